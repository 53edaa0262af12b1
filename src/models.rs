// Copyright: Oleander Transit Dashboard contributors

use chrono::{DateTime, Utc};
use compact_str::CompactString;

/// Backend identifiers arrive as opaque text (uuids in production, short
/// strings in the demo dataset).
pub type EntityId = CompactString;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub id: EntityId,
    pub name: String,
    /// Ordered (lat, lon) pairs tracing the route on the map.
    pub shape: Vec<(f64, f64)>,
    /// Optional backend passthrough. The core never invents colors; palette
    /// derivation belongs to the presentation layer.
    pub color: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Stop {
    pub id: EntityId,
    pub route_id: EntityId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Ascending along the route, unique per route.
    pub stop_order: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub id: EntityId,
    pub route_id: EntityId,
    pub name: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: EntityId,
    pub vehicle_id: EntityId,
    pub lat: f64,
    pub lon: f64,
    /// km/h
    pub speed: Option<f32>,
    /// Degrees clockwise from north.
    pub heading: Option<f32>,
    /// Later timestamp wins. Only the maximum-timestamp position per vehicle
    /// is authoritative.
    pub timestamp: DateTime<Utc>,
}

/// The denormalized record handed to presentation: a vehicle joined with its
/// authoritative position and its route. A vehicle with no position yet is
/// still present, never dropped.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VehicleWithPosition {
    #[serde(flatten)]
    pub vehicle: Vehicle,
    pub position: Option<Position>,
    pub route: Option<Route>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchResult {
    Route {
        id: EntityId,
        name: String,
    },
    Stop {
        id: EntityId,
        name: String,
        /// Owning route's name, when the reference resolves.
        route_name: Option<String>,
        lat: f64,
        lon: f64,
    },
}

impl SearchResult {
    pub fn name(&self) -> &str {
        match self {
            SearchResult::Route { name, .. } => name,
            SearchResult::Stop { name, .. } => name,
        }
    }
}

/// Map viewport the presentation layer is instructed to show.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FocusTarget {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
}

/// Resolved selection state, broadcast to all consumers. Selecting a vehicle
/// that has a position also retargets the focus; focusing directly never
/// touches the selected vehicle.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectionState {
    pub selected_vehicle_id: Option<EntityId>,
    pub focus: Option<FocusTarget>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSeverity {
    Info,
    Error,
}

/// User-visible notification. The core raises these sparingly: one per
/// distinct sync failure cause, plus informational notices from search
/// selection policies.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Notice {
        Notice {
            severity: NoticeSeverity::Info,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Notice {
        Notice {
            severity: NoticeSeverity::Error,
            title: title.into(),
            body: body.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Fetching,
    Ready,
    Failed,
}
