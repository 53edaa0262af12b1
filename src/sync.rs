// Copyright: Oleander Transit Dashboard contributors
// Fetch -> merge -> publish orchestration with stale-response discard

use crate::datasource::{DataAccessError, TransitSource};
use crate::merge::merge_vehicle_views;
use crate::models::{EntityId, Notice, Position, Route, Stop, SyncStatus, Vehicle};
use crate::store::{DashboardSnapshot, EntityStore};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};

struct SequenceState {
    next_issued: u64,
    last_published: u64,
    /// Rendered cause of the failure last surfaced to the user. A repeat of
    /// the same cause stays quiet; a new cause notifies again. Reset on the
    /// next successful publish.
    notified_failure: Option<String>,
}

/// Keeps the entity store and the published snapshot eventually consistent
/// with the backend.
///
/// Status walks Idle -> Fetching -> {Ready, Failed}; both terminals re-enter
/// Fetching on the next trigger (change event, manual refresh, remount).
/// Concurrent fetches are fine: each takes a monotonically increasing
/// sequence number and only the highest-numbered completion publishes, so an
/// old response arriving late is discarded rather than clobbering newer data.
pub struct SyncController {
    source: Arc<dyn TransitSource>,
    store: Mutex<EntityStore>,
    sequence: Mutex<SequenceState>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    notice_tx: broadcast::Sender<Notice>,
}

impl SyncController {
    pub fn new(source: Arc<dyn TransitSource>) -> SyncController {
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::default());
        let (notice_tx, _) = broadcast::channel(64);
        SyncController {
            source,
            store: Mutex::new(EntityStore::new()),
            sequence: Mutex::new(SequenceState {
                next_issued: 0,
                last_published: 0,
                notified_failure: None,
            }),
            snapshot_tx,
            notice_tx,
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch stream of snapshots for consumers that want push updates.
    pub fn snapshot_rx(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// User-visible notifications (sync failures, search selection notices).
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// Sender half for collaborators; the selection controller raises its
    /// informational notices through the same stream.
    pub fn notice_sender(&self) -> broadcast::Sender<Notice> {
        self.notice_tx.clone()
    }

    /// Manual refresh. Safe to call while a fetch is already in flight; the
    /// newest fetch wins the publish.
    pub async fn refresh(&self) -> Result<(), DataAccessError> {
        tracing::info!("manual refresh requested");
        self.fetch_all().await
    }

    /// One full fetch -> merge -> publish cycle.
    ///
    /// On failure the last good snapshot is retained with status Failed
    /// (stale-but-available: never an empty map on a transient outage) and
    /// one notice is raised per distinct cause.
    pub async fn fetch_all(&self) -> Result<(), DataAccessError> {
        let sequence = {
            let mut seq = self.sequence.lock().unwrap();
            seq.next_issued += 1;
            seq.next_issued
        };
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.status = SyncStatus::Fetching);
        tracing::debug!(sequence, "fetch cycle started");

        match self.fetch_cycle().await {
            Ok(fetched) => {
                self.publish(sequence, fetched);
                Ok(())
            }
            Err(error) => {
                self.record_failure(sequence, &error);
                Err(error)
            }
        }
    }

    async fn fetch_cycle(
        &self,
    ) -> Result<(Vec<Route>, Vec<Stop>, Vec<Vehicle>, Vec<Position>), DataAccessError> {
        let (routes, vehicles, stops) = futures::try_join!(
            self.source.list_routes(),
            self.source.list_active_vehicles(),
            self.source.list_stops(),
        )?;
        let vehicle_ids: Vec<EntityId> = vehicles.iter().map(|v| v.id.clone()).collect();
        let positions = self.source.list_positions(vehicle_ids).await?;
        Ok((routes, stops, vehicles, positions))
    }

    /// Swap the store and publish, unless a newer fetch already did. The
    /// store is only ever mutated here, synchronously, with the winning
    /// fetch's complete result.
    fn publish(
        &self,
        sequence: u64,
        (routes, stops, vehicles, positions): (Vec<Route>, Vec<Stop>, Vec<Vehicle>, Vec<Position>),
    ) {
        {
            let mut seq = self.sequence.lock().unwrap();
            if sequence <= seq.last_published {
                tracing::debug!(
                    sequence,
                    last_published = seq.last_published,
                    "stale fetch result discarded"
                );
                return;
            }
            seq.last_published = sequence;
            seq.notified_failure = None;
        }

        let snapshot = {
            let mut store = self.store.lock().unwrap();
            store.replace_all(routes, stops, vehicles, positions);
            DashboardSnapshot {
                vehicles: merge_vehicle_views(&store.vehicles, &store.positions, &store.routes),
                routes: store.routes.clone(),
                stops: store.stops.clone(),
                status: SyncStatus::Ready,
                sequence,
                last_updated: store.refreshed_at,
            }
        };

        tracing::debug!(sequence, "snapshot published");
        let _ = self.snapshot_tx.send_replace(snapshot);
    }

    fn record_failure(&self, sequence: u64, error: &DataAccessError) {
        let cause = error.to_string();
        tracing::warn!(sequence, %cause, "fetch cycle failed, keeping last good snapshot");

        let already_notified = {
            let mut seq = self.sequence.lock().unwrap();
            if sequence <= seq.last_published {
                // A newer fetch already published; this failure is history.
                return;
            }
            let repeat = seq.notified_failure.as_deref() == Some(cause.as_str());
            if !repeat {
                seq.notified_failure = Some(cause.clone());
            }
            repeat
        };

        self.snapshot_tx
            .send_modify(|snapshot| snapshot.status = SyncStatus::Failed);
        if !already_notified {
            let _ = self
                .notice_tx
                .send(Notice::error("Error loading live data", cause));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemorySource;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn small_source() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        source.add_route(Route {
            id: "r1".into(),
            name: "Blue Line".to_string(),
            shape: Vec::new(),
            color: None,
        });
        source.add_vehicle(Vehicle {
            id: "v1".into(),
            route_id: "r1".into(),
            name: "Bus 1".to_string(),
            is_active: true,
        });
        source.add_position(Position {
            id: "p1".into(),
            vehicle_id: "v1".into(),
            lat: 40.75,
            lon: -73.98,
            speed: None,
            heading: None,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        });
        source
    }

    fn controller(source: Arc<MemorySource>) -> SyncController {
        SyncController::new(source)
    }

    #[tokio::test]
    async fn fetch_all_publishes_merged_snapshot() {
        let controller = controller(small_source());
        assert_eq!(controller.snapshot().status, SyncStatus::Idle);

        controller.fetch_all().await.unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Ready);
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.vehicles.len(), 1);
        assert_eq!(snapshot.vehicles[0].position.as_ref().unwrap().id, "p1");
        assert_eq!(
            snapshot.vehicles[0].route.as_ref().map(|r| r.name.as_str()),
            Some("Blue Line")
        );
        assert!(snapshot.last_updated.is_some());
    }

    #[tokio::test]
    async fn failure_keeps_last_good_snapshot() {
        let source = small_source();
        let controller = controller(source.clone());
        controller.fetch_all().await.unwrap();

        source.set_failure(Some("db down"));
        let error = controller.fetch_all().await.unwrap_err();
        assert!(matches!(error, DataAccessError::Unreachable(_)));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, SyncStatus::Failed);
        // The data is stale but still there.
        assert_eq!(snapshot.vehicles.len(), 1);
        assert_eq!(snapshot.sequence, 1);
    }

    #[tokio::test]
    async fn one_notice_per_distinct_failure_cause() {
        let source = small_source();
        let controller = controller(source.clone());
        let mut notices = controller.notices();

        source.set_failure(Some("db down"));
        let _ = controller.fetch_all().await;
        let _ = controller.fetch_all().await;
        let _ = controller.fetch_all().await;

        source.set_failure(Some("disk on fire"));
        let _ = controller.fetch_all().await;

        let first = notices.try_recv().unwrap();
        assert!(first.body.contains("db down"));
        let second = notices.try_recv().unwrap();
        assert!(second.body.contains("disk on fire"));
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn recovery_then_same_failure_notifies_again() {
        let source = small_source();
        let controller = controller(source.clone());
        let mut notices = controller.notices();

        source.set_failure(Some("db down"));
        let _ = controller.fetch_all().await;
        source.set_failure(None);
        controller.fetch_all().await.unwrap();
        source.set_failure(Some("db down"));
        let _ = controller.fetch_all().await;

        assert!(notices.try_recv().is_ok());
        assert!(notices.try_recv().is_ok());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_response_is_discarded() {
        let source = small_source();
        let controller = Arc::new(controller(source.clone()));

        // Fetch A: slow, issued first.
        source.set_latency(Duration::from_millis(100));
        let slow = tokio::spawn({
            let controller = controller.clone();
            async move { controller.fetch_all().await }
        });
        // Give A time to take its sequence number and start sleeping.
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Fetch B: fast, issued second, resolves first, sees the rename.
        source.set_latency(Duration::ZERO);
        source.rename_vehicle("v1", "Bus 1 renamed");
        controller.fetch_all().await.unwrap();
        assert_eq!(controller.snapshot().sequence, 2);

        // Mutate again so A's late read would be observably different.
        source.rename_vehicle("v1", "Bus 1 late");
        slow.await.unwrap().unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.vehicles[0].vehicle.name, "Bus 1 renamed");
        assert_eq!(snapshot.status, SyncStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failure_does_not_mask_newer_success() {
        let source = small_source();
        let controller = Arc::new(controller(source.clone()));
        let mut notices = controller.notices();

        // Fetch A: slow and doomed (failure cause captured at issue time).
        source.set_failure(Some("db down"));
        source.set_latency(Duration::from_millis(100));
        let doomed = tokio::spawn({
            let controller = controller.clone();
            async move { controller.fetch_all().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Fetch B: healthy, publishes before A resolves.
        source.set_failure(None);
        source.set_latency(Duration::ZERO);
        controller.fetch_all().await.unwrap();

        assert!(doomed.await.unwrap().is_err());

        // A's late failure neither flips the status nor notifies.
        assert_eq!(controller.snapshot().status, SyncStatus::Ready);
        assert!(notices.try_recv().is_err());
    }
}
