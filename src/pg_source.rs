// Copyright: Oleander Transit Dashboard contributors

use crate::change_feed::{ChangeEvent, ChangeSubscription};
use crate::datasource::{DataAccessError, TransitSource};
use crate::models::{EntityId, Position, Route, Stop, Vehicle};
use futures::future::BoxFuture;
use sqlx::Row;
use sqlx::postgres::{PgListener, PgPoolOptions};
use tokio::sync::mpsc;

/// Notification channel the backend triggers `pg_notify` on for every
/// position insert and vehicle update.
pub const CHANGE_CHANNEL: &str = "transit_changes";

/// Postgres-backed [`TransitSource`].
///
/// Expected schema: `routes(id text, name text, shape text, color text)`,
/// `stops(id text, route_id text, name text, lat float8, lon float8,
/// stop_order int4)`, `vehicles(id text, route_id text, name text,
/// is_active bool)`, `positions(id text, vehicle_id text, lat float8,
/// lon float8, speed float4, heading float4, timestamp timestamptz)`.
/// `shape` holds a JSON array of [lat, lon] pairs.
pub struct PgSource {
    pool: sqlx::PgPool,
}

/// Payload of a `pg_notify` on [`CHANGE_CHANNEL`], emitted by row triggers.
#[derive(Debug, Deserialize)]
struct ChangePayload {
    table: String,
    op: String,
    #[serde(default)]
    id: Option<EntityId>,
}

impl PgSource {
    pub async fn connect(database_url: &str) -> Result<PgSource, DataAccessError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(unreachable_error)?;
        Ok(PgSource { pool })
    }

    pub fn new(pool: sqlx::PgPool) -> PgSource {
        PgSource { pool }
    }
}

fn unreachable_error(error: sqlx::Error) -> DataAccessError {
    DataAccessError::Unreachable(error.to_string())
}

fn query_error(error: sqlx::Error) -> DataAccessError {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            DataAccessError::Unreachable(error.to_string())
        }
        other => DataAccessError::QueryRejected(other.to_string()),
    }
}

fn decode_shape(raw: Option<String>) -> Vec<(f64, f64)> {
    // A malformed shape is a referential gap, not a fatal error: the route
    // still renders as a line-less entry.
    raw.and_then(|text| serde_json::from_str::<Vec<(f64, f64)>>(&text).ok())
        .unwrap_or_default()
}

impl TransitSource for PgSource {
    fn list_routes(&self) -> BoxFuture<'_, Result<Vec<Route>, DataAccessError>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT id, name, shape, color FROM routes ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;
            rows.iter()
                .map(|row| {
                    Ok(Route {
                        id: EntityId::from(row.try_get::<String, _>("id").map_err(query_error)?),
                        name: row.try_get("name").map_err(query_error)?,
                        shape: decode_shape(row.try_get("shape").map_err(query_error)?),
                        color: row.try_get("color").map_err(query_error)?,
                    })
                })
                .collect()
        })
    }

    fn list_active_vehicles(&self) -> BoxFuture<'_, Result<Vec<Vehicle>, DataAccessError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, route_id, name, is_active FROM vehicles WHERE is_active ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
            rows.iter()
                .map(|row| {
                    Ok(Vehicle {
                        id: EntityId::from(row.try_get::<String, _>("id").map_err(query_error)?),
                        route_id: EntityId::from(
                            row.try_get::<String, _>("route_id").map_err(query_error)?,
                        ),
                        name: row.try_get("name").map_err(query_error)?,
                        is_active: row.try_get("is_active").map_err(query_error)?,
                    })
                })
                .collect()
        })
    }

    fn list_positions(
        &self,
        vehicle_ids: Vec<EntityId>,
    ) -> BoxFuture<'_, Result<Vec<Position>, DataAccessError>> {
        Box::pin(async move {
            let ids: Vec<String> = vehicle_ids.iter().map(|id| id.to_string()).collect();
            let rows = sqlx::query(
                "SELECT id, vehicle_id, lat, lon, speed, heading, timestamp \
                 FROM positions WHERE vehicle_id = ANY($1)",
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
            rows.iter()
                .map(|row| {
                    Ok(Position {
                        id: EntityId::from(row.try_get::<String, _>("id").map_err(query_error)?),
                        vehicle_id: EntityId::from(
                            row.try_get::<String, _>("vehicle_id").map_err(query_error)?,
                        ),
                        lat: row.try_get("lat").map_err(query_error)?,
                        lon: row.try_get("lon").map_err(query_error)?,
                        speed: row.try_get("speed").map_err(query_error)?,
                        heading: row.try_get("heading").map_err(query_error)?,
                        timestamp: row.try_get("timestamp").map_err(query_error)?,
                    })
                })
                .collect()
        })
    }

    fn list_stops(&self) -> BoxFuture<'_, Result<Vec<Stop>, DataAccessError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, route_id, name, lat, lon, stop_order FROM stops ORDER BY route_id, stop_order",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
            rows.iter()
                .map(|row| {
                    Ok(Stop {
                        id: EntityId::from(row.try_get::<String, _>("id").map_err(query_error)?),
                        route_id: EntityId::from(
                            row.try_get::<String, _>("route_id").map_err(query_error)?,
                        ),
                        name: row.try_get("name").map_err(query_error)?,
                        lat: row.try_get("lat").map_err(query_error)?,
                        lon: row.try_get("lon").map_err(query_error)?,
                        stop_order: row.try_get("stop_order").map_err(query_error)?,
                    })
                })
                .collect()
        })
    }

    /// LISTEN on [`CHANGE_CHANNEL`] and pump decoded events to the listener.
    /// Unknown tables and ops are ignored; a dropped connection is retried
    /// with a short pause rather than tearing the feed down.
    fn subscribe_changes(&self) -> BoxFuture<'_, Result<ChangeSubscription, DataAccessError>> {
        Box::pin(async move {
            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(unreachable_error)?;
            listener
                .listen(CHANGE_CHANNEL)
                .await
                .map_err(query_error)?;

            let (tx, rx) = mpsc::unbounded_channel();
            let pump = tokio::spawn(async move {
                loop {
                    match listener.recv().await {
                        Ok(notification) => {
                            let Some(event) = decode_notification(notification.payload()) else {
                                continue;
                            };
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "change feed connection lost, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            });
            Ok(ChangeSubscription::with_pump(rx, pump))
        })
    }
}

fn decode_notification(payload: &str) -> Option<ChangeEvent> {
    let payload: ChangePayload = match serde_json::from_str(payload) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(%error, "undecodable change payload ignored");
            return None;
        }
    };
    match (payload.table.as_str(), payload.op.to_lowercase().as_str()) {
        ("positions", "insert") => Some(ChangeEvent::PositionInserted {
            vehicle_id: payload.id,
        }),
        ("vehicles", "update") => Some(ChangeEvent::VehicleUpdated {
            vehicle_id: payload.id,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_insert_payload_decodes() {
        let event = decode_notification(
            r#"{"table":"positions","op":"INSERT","id":"bus-001"}"#,
        );
        assert_eq!(
            event,
            Some(ChangeEvent::PositionInserted {
                vehicle_id: Some("bus-001".into())
            })
        );
    }

    #[test]
    fn vehicle_update_payload_decodes() {
        let event = decode_notification(r#"{"table":"vehicles","op":"update"}"#);
        assert_eq!(
            event,
            Some(ChangeEvent::VehicleUpdated { vehicle_id: None })
        );
    }

    #[test]
    fn unrelated_tables_and_garbage_are_ignored() {
        assert_eq!(
            decode_notification(r#"{"table":"alerts","op":"insert"}"#),
            None
        );
        assert_eq!(decode_notification("not json"), None);
    }

    #[test]
    fn malformed_shape_yields_empty_line() {
        assert!(decode_shape(Some("not json".to_string())).is_empty());
        assert!(decode_shape(None).is_empty());
        assert_eq!(
            decode_shape(Some("[[40.75,-73.98],[40.76,-73.99]]".to_string())),
            vec![(40.75, -73.98), (40.76, -73.99)]
        );
    }
}
