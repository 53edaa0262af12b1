// Copyright: Oleander Transit Dashboard contributors

use crate::change_feed::{ChangeEvent, ChangeSubscription};
use crate::models::{EntityId, Position, Route, Stop, Vehicle};
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Backend retrieval failure. Carries a human-readable cause; the sync
/// controller keys its once-per-distinct-cause notification on the rendered
/// message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataAccessError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("query rejected: {0}")]
    QueryRejected(String),
}

/// Read contract against the backing store. Collections come back in the
/// requested order (routes and vehicles by name, stops by stop order);
/// positions are unordered and restricted to the given vehicle ids.
///
/// Object-safe on purpose: the controller holds an `Arc<dyn TransitSource>`
/// so deployments can swap the postgres source for the in-memory one.
pub trait TransitSource: Send + Sync + 'static {
    fn list_routes(&self) -> BoxFuture<'_, Result<Vec<Route>, DataAccessError>>;

    fn list_active_vehicles(&self) -> BoxFuture<'_, Result<Vec<Vehicle>, DataAccessError>>;

    fn list_positions(
        &self,
        vehicle_ids: Vec<EntityId>,
    ) -> BoxFuture<'_, Result<Vec<Position>, DataAccessError>>;

    fn list_stops(&self) -> BoxFuture<'_, Result<Vec<Stop>, DataAccessError>>;

    /// Subscribe to position-insert and vehicle-update notifications.
    /// Dropping the returned subscription unsubscribes.
    fn subscribe_changes(&self) -> BoxFuture<'_, Result<ChangeSubscription, DataAccessError>>;
}

#[derive(Debug, Default)]
struct MemoryData {
    routes: Vec<Route>,
    stops: Vec<Stop>,
    vehicles: Vec<Vehicle>,
    positions: Vec<Position>,
}

/// In-memory [`TransitSource`] with a programmable change feed. Serves demo
/// mode and the test suite; the knobs (latency, injected failure) exist so
/// tests can reproduce out-of-order completions and backend outages.
#[derive(Debug, Default)]
pub struct MemorySource {
    data: RwLock<MemoryData>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    latency_ms: AtomicU64,
    failure: Mutex<Option<String>>,
    fetch_rounds: AtomicUsize,
    next_position_id: AtomicU64,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource::default()
    }

    /// Seeded with the demo dataset: three Manhattan-ish routes, their
    /// stops, and a handful of buses with fresh positions.
    pub fn with_demo_data() -> MemorySource {
        let source = MemorySource::new();
        for route in demo_routes() {
            source.add_route(route);
        }
        for stop in demo_stops() {
            source.add_stop(stop);
        }
        for (vehicle, position) in demo_vehicles() {
            source.add_vehicle(vehicle);
            source.add_position(position);
        }
        source
    }

    pub fn add_route(&self, route: Route) {
        self.data.write().unwrap().routes.push(route);
    }

    pub fn add_stop(&self, stop: Stop) {
        self.data.write().unwrap().stops.push(stop);
    }

    pub fn add_vehicle(&self, vehicle: Vehicle) {
        self.data.write().unwrap().vehicles.push(vehicle);
    }

    /// Insert a position and notify subscribers, like a row landing in the
    /// positions table.
    pub fn add_position(&self, position: Position) {
        let vehicle_id = position.vehicle_id.clone();
        self.data.write().unwrap().positions.push(position);
        self.notify(ChangeEvent::PositionInserted {
            vehicle_id: Some(vehicle_id),
        });
    }

    /// Overwrite a vehicle row and notify subscribers.
    pub fn update_vehicle(&self, vehicle: Vehicle) {
        let id = vehicle.id.clone();
        {
            let mut data = self.data.write().unwrap();
            match data.vehicles.iter_mut().find(|v| v.id == id) {
                Some(existing) => *existing = vehicle,
                None => data.vehicles.push(vehicle),
            }
        }
        self.notify(ChangeEvent::VehicleUpdated {
            vehicle_id: Some(id),
        });
    }

    /// Emit a vehicle-update notification without changing any row. Stands
    /// in for the at-least-once duplicate deliveries of a real feed.
    pub fn touch_vehicle(&self, vehicle_id: &str) {
        self.notify(ChangeEvent::VehicleUpdated {
            vehicle_id: Some(vehicle_id.into()),
        });
    }

    pub fn rename_vehicle(&self, vehicle_id: &str, name: &str) {
        {
            let mut data = self.data.write().unwrap();
            if let Some(vehicle) = data.vehicles.iter_mut().find(|v| v.id == vehicle_id) {
                vehicle.name = name.to_string();
            }
        }
        self.notify(ChangeEvent::VehicleUpdated {
            vehicle_id: Some(vehicle_id.into()),
        });
    }

    /// Artificial delay applied at the start of every list call, read at
    /// call time. Lets tests overlap an old slow fetch with a new fast one.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// When set, every list call fails with `Unreachable(cause)`.
    pub fn set_failure(&self, cause: Option<&str>) {
        *self.failure.lock().unwrap() = cause.map(|c| c.to_string());
    }

    /// Number of full fetch rounds observed (counted on the vehicles call,
    /// one per `fetch_all`).
    pub fn fetch_rounds(&self) -> usize {
        self.fetch_rounds.load(Ordering::SeqCst)
    }

    pub async fn subscribe(&self) -> Result<ChangeSubscription, DataAccessError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        Ok(ChangeSubscription::from_receiver(rx))
    }

    fn notify(&self, event: ChangeEvent) {
        // Closed receivers are pruned as they are discovered.
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Latency and failure are captured at call time, before the sleep. A
    /// request issued during an outage still fails after the outage clears.
    async fn gate(&self) -> Result<(), DataAccessError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        let failure = self.failure.lock().unwrap().clone();
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if let Some(cause) = failure {
            return Err(DataAccessError::Unreachable(cause));
        }
        Ok(())
    }
}

impl TransitSource for MemorySource {
    fn list_routes(&self) -> BoxFuture<'_, Result<Vec<Route>, DataAccessError>> {
        Box::pin(async move {
            self.gate().await?;
            let mut routes = self.data.read().unwrap().routes.clone();
            routes.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(routes)
        })
    }

    fn list_active_vehicles(&self) -> BoxFuture<'_, Result<Vec<Vehicle>, DataAccessError>> {
        Box::pin(async move {
            self.gate().await?;
            self.fetch_rounds.fetch_add(1, Ordering::SeqCst);
            let mut vehicles: Vec<Vehicle> = self
                .data
                .read()
                .unwrap()
                .vehicles
                .iter()
                .filter(|v| v.is_active)
                .cloned()
                .collect();
            vehicles.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(vehicles)
        })
    }

    fn list_positions(
        &self,
        vehicle_ids: Vec<EntityId>,
    ) -> BoxFuture<'_, Result<Vec<Position>, DataAccessError>> {
        Box::pin(async move {
            self.gate().await?;
            Ok(self
                .data
                .read()
                .unwrap()
                .positions
                .iter()
                .filter(|p| vehicle_ids.contains(&p.vehicle_id))
                .cloned()
                .collect())
        })
    }

    fn list_stops(&self) -> BoxFuture<'_, Result<Vec<Stop>, DataAccessError>> {
        Box::pin(async move {
            self.gate().await?;
            let mut stops = self.data.read().unwrap().stops.clone();
            stops.sort_by_key(|s| (s.route_id.clone(), s.stop_order));
            Ok(stops)
        })
    }

    fn subscribe_changes(&self) -> BoxFuture<'_, Result<ChangeSubscription, DataAccessError>> {
        Box::pin(self.subscribe())
    }
}

/// Nudge every vehicle's latest position at a fixed cadence, inserting new
/// position rows and notifying subscribers. Demo-mode stand-in for a live
/// feed.
pub fn spawn_demo_feed(source: Arc<MemorySource>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use rand::Rng;
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let latest: Vec<Position> = {
                let data = source.data.read().unwrap();
                data.vehicles
                    .iter()
                    .filter(|v| v.is_active)
                    .filter_map(|v| {
                        data.positions
                            .iter()
                            .filter(|p| p.vehicle_id == v.id)
                            .max_by_key(|p| p.timestamp)
                            .cloned()
                    })
                    .collect()
            };
            let mut rng = rand::rng();
            for previous in latest {
                let id = source.next_position_id.fetch_add(1, Ordering::SeqCst);
                source.add_position(Position {
                    id: format!("demo-{}", id).into(),
                    vehicle_id: previous.vehicle_id.clone(),
                    lat: previous.lat + rng.random_range(-0.002..0.002),
                    lon: previous.lon + rng.random_range(-0.002..0.002),
                    speed: Some(rng.random_range(10.0..45.0)),
                    heading: Some(rng.random_range(0.0..360.0)),
                    timestamp: Utc::now(),
                });
            }
        }
    })
}

fn demo_routes() -> Vec<Route> {
    vec![
        Route {
            id: "1".into(),
            name: "Blue Line Express".to_string(),
            shape: vec![
                (40.7589, -73.9851),
                (40.7505, -73.9934),
                (40.7505, -73.9969),
                (40.7489, -74.0014),
                (40.7282, -74.0776),
            ],
            color: Some("#3b82f6".to_string()),
        },
        Route {
            id: "2".into(),
            name: "Green Line Local".to_string(),
            shape: vec![
                (40.7831, -73.9712),
                (40.7794, -73.9632),
                (40.7589, -73.9851),
                (40.7505, -73.9934),
                (40.7282, -74.0059),
            ],
            color: Some("#10b981".to_string()),
        },
        Route {
            id: "3".into(),
            name: "Orange Express".to_string(),
            shape: vec![
                (40.8176, -73.9482),
                (40.7831, -73.9712),
                (40.7589, -73.9851),
                (40.7282, -74.0059),
                (40.7074, -74.0113),
            ],
            color: Some("#f59e0b".to_string()),
        },
    ]
}

fn demo_stops() -> Vec<Stop> {
    let rows: [(&str, &str, &str, f64, f64, i32); 6] = [
        ("1", "1", "Times Square", 40.7589, -73.9851, 1),
        ("2", "1", "Port Authority", 40.7505, -73.9934, 2),
        ("3", "1", "Lincoln Tunnel", 40.7505, -73.9969, 3),
        ("4", "2", "Central Park North", 40.7831, -73.9712, 1),
        ("5", "2", "East Side", 40.7794, -73.9632, 2),
        ("6", "3", "Bronx Terminal", 40.8176, -73.9482, 1),
    ];
    rows.into_iter()
        .map(|(id, route_id, name, lat, lon, stop_order)| Stop {
            id: id.into(),
            route_id: route_id.into(),
            name: name.to_string(),
            lat,
            lon,
            stop_order,
        })
        .collect()
}

fn demo_vehicles() -> Vec<(Vehicle, Position)> {
    let rows: [(&str, &str, &str, f64, f64); 4] = [
        ("bus-001", "1", "Express 42", 40.7550, -73.9900),
        ("bus-002", "2", "Local 7", 40.7700, -73.9750),
        ("bus-003", "3", "Express 15", 40.7900, -73.9600),
        ("bus-004", "1", "Express 44", 40.7400, -74.0100),
    ];
    rows.into_iter()
        .enumerate()
        .map(|(index, (id, route_id, name, lat, lon))| {
            (
                Vehicle {
                    id: id.into(),
                    route_id: route_id.into(),
                    name: name.to_string(),
                    is_active: true,
                },
                Position {
                    id: format!("seed-{}", index).into(),
                    vehicle_id: id.into(),
                    lat,
                    lon,
                    speed: Some(25.0),
                    heading: Some(90.0),
                    timestamp: Utc::now(),
                },
            )
        })
        .collect()
}
