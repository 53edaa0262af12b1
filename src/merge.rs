// Copyright: Oleander Transit Dashboard contributors

use crate::models::{Position, Route, Vehicle, VehicleWithPosition};
use ahash::AHashMap;
use std::collections::hash_map::Entry;

/// Join vehicles, their authoritative positions, and their routes into the
/// denormalized view model. Pure: same inputs, same output.
///
/// Linear in |vehicles| + |positions| + |routes| via id-indexed lookups.
/// Output order equals input vehicle order so downstream consumers keyed on
/// list identity stay stable across re-merges.
pub fn merge_vehicle_views(
    vehicles: &[Vehicle],
    positions: &[Position],
    routes: &[Route],
) -> Vec<VehicleWithPosition> {
    let route_by_id: AHashMap<&str, &Route> =
        routes.iter().map(|r| (r.id.as_str(), r)).collect();

    // Authoritative position per vehicle: maximum timestamp, first-seen wins
    // on ties.
    let mut latest_position: AHashMap<&str, &Position> =
        AHashMap::with_capacity(vehicles.len());
    for position in positions {
        match latest_position.entry(position.vehicle_id.as_str()) {
            Entry::Occupied(mut current) => {
                if position.timestamp > current.get().timestamp {
                    current.insert(position);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(position);
            }
        }
    }

    vehicles
        .iter()
        .filter(|vehicle| vehicle.is_active)
        .map(|vehicle| VehicleWithPosition {
            vehicle: vehicle.clone(),
            position: latest_position
                .get(vehicle.id.as_str())
                .map(|p| (*p).clone()),
            route: route_by_id
                .get(vehicle.route_id.as_str())
                .map(|r| (*r).clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn route(id: &str, name: &str) -> Route {
        Route {
            id: id.into(),
            name: name.to_string(),
            shape: vec![(40.7589, -73.9851), (40.7505, -73.9934)],
            color: None,
        }
    }

    fn vehicle(id: &str, route_id: &str, active: bool) -> Vehicle {
        Vehicle {
            id: id.into(),
            route_id: route_id.into(),
            name: format!("Bus {}", id),
            is_active: active,
        }
    }

    fn position(id: &str, vehicle_id: &str, lat: f64, ts_secs: i64) -> Position {
        Position {
            id: id.into(),
            vehicle_id: vehicle_id.into(),
            lat,
            lon: -73.99,
            speed: Some(25.0),
            heading: None,
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
        }
    }

    #[test]
    fn merge_is_deterministic() {
        let vehicles = vec![vehicle("v1", "r1", true), vehicle("v2", "r2", true)];
        let positions = vec![
            position("p1", "v1", 40.1, 100),
            position("p2", "v2", 40.2, 200),
            position("p3", "v1", 40.3, 300),
        ];
        let routes = vec![route("r1", "Blue Line Express")];

        let first = merge_vehicle_views(&vehicles, &positions, &routes);
        let second = merge_vehicle_views(&vehicles, &positions, &routes);
        assert_eq!(first, second);
    }

    #[test]
    fn latest_timestamp_wins() {
        let vehicles = vec![vehicle("v1", "r1", true)];
        let positions = vec![
            position("old", "v1", 40.1, 100),
            position("new", "v1", 40.2, 200),
        ];
        let merged = merge_vehicle_views(&vehicles, &positions, &[route("r1", "Blue")]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].position.as_ref().unwrap().id, "new");
    }

    #[test]
    fn timestamp_tie_keeps_first_seen() {
        let vehicles = vec![vehicle("v1", "r1", true)];
        let positions = vec![
            position("first", "v1", 40.1, 100),
            position("second", "v1", 40.2, 100),
        ];
        let merged = merge_vehicle_views(&vehicles, &positions, &[]);
        assert_eq!(merged[0].position.as_ref().unwrap().id, "first");
    }

    #[test]
    fn missing_route_is_tolerated() {
        let vehicles = vec![vehicle("v1", "ghost-route", true)];
        let merged = merge_vehicle_views(&vehicles, &[], &[route("r1", "Blue")]);

        assert_eq!(merged.len(), 1);
        assert!(merged[0].route.is_none());
        assert!(merged[0].position.is_none());
    }

    #[test]
    fn vehicle_without_position_is_kept() {
        let vehicles = vec![vehicle("v1", "r1", true), vehicle("v2", "r1", true)];
        let positions = vec![position("p1", "v1", 40.1, 100)];
        let merged = merge_vehicle_views(&vehicles, &positions, &[route("r1", "Blue")]);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].position.is_some());
        assert!(merged[1].position.is_none());
    }

    #[test]
    fn inactive_vehicles_are_excluded() {
        let vehicles = vec![vehicle("v1", "r1", true), vehicle("v2", "r1", false)];
        let merged = merge_vehicle_views(&vehicles, &[], &[]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].vehicle.id, "v1");
    }

    #[test]
    fn output_order_matches_input_order() {
        let vehicles = vec![
            vehicle("zulu", "r1", true),
            vehicle("alpha", "r1", true),
            vehicle("mike", "r1", true),
        ];
        let merged = merge_vehicle_views(&vehicles, &[], &[]);
        let ids: Vec<&str> = merged.iter().map(|v| v.vehicle.id.as_str()).collect();
        assert_eq!(ids, vec!["zulu", "alpha", "mike"]);
    }
}
