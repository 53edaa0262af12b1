// Copyright: Oleander Transit Dashboard contributors

use crate::models::{Position, Route, Stop, SyncStatus, Vehicle, VehicleWithPosition};
use chrono::{DateTime, Utc};

/// In-memory holder of the raw entity collections last fetched from the
/// backend, plus their freshness timestamp. Mutated only at well-defined
/// synchronous points right after a fetch completes, so readers never see a
/// partially updated store.
#[derive(Clone, Debug, Default)]
pub struct EntityStore {
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub vehicles: Vec<Vehicle>,
    pub positions: Vec<Position>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl EntityStore {
    pub fn new() -> EntityStore {
        EntityStore::default()
    }

    /// Swap in a complete fetch result in one step.
    pub fn replace_all(
        &mut self,
        routes: Vec<Route>,
        stops: Vec<Stop>,
        vehicles: Vec<Vehicle>,
        positions: Vec<Position>,
    ) {
        self.routes = routes;
        self.stops = stops;
        self.vehicles = vehicles;
        self.positions = positions;
        self.refreshed_at = Some(Utc::now());
    }
}

/// The consistent snapshot published after every merge. Consumers only ever
/// see complete snapshots; a failed fetch leaves the previous one in place
/// with the status flipped to Failed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DashboardSnapshot {
    pub vehicles: Vec<VehicleWithPosition>,
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub status: SyncStatus,
    /// Publish sequence number of the fetch that produced this data.
    pub sequence: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl DashboardSnapshot {
    /// First vehicle on the route in store order, used by the route
    /// search-selection policy.
    pub fn first_vehicle_on_route(&self, route_id: &str) -> Option<&VehicleWithPosition> {
        self.vehicles
            .iter()
            .find(|v| v.vehicle.route_id == route_id)
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Option<&VehicleWithPosition> {
        self.vehicles.iter().find(|v| v.vehicle.id == vehicle_id)
    }
}
