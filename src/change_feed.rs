// Copyright: Oleander Transit Dashboard contributors

use crate::models::EntityId;
use crate::sync::SyncController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Discrete change notification from the backend. Delivery is at-least-once;
/// duplicates are harmless because the only reaction is an idempotent
/// re-fetch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    PositionInserted { vehicle_id: Option<EntityId> },
    VehicleUpdated { vehicle_id: Option<EntityId> },
    /// Synthetic event from the interval ticker fallback for backends with
    /// no push channel.
    Tick,
}

/// Aborts the wrapped task when dropped. Keeps subscription pump tasks from
/// outliving their consumers.
#[derive(Debug)]
pub(crate) struct AbortOnDrop(pub JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A live change-feed subscription: a stream of [`ChangeEvent`]s plus the
/// pump task feeding it. Dropping the subscription cancels the pump, which
/// is the deterministic unsubscribe the view teardown relies on.
#[derive(Debug)]
pub struct ChangeSubscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    _pump: Option<AbortOnDrop>,
}

impl ChangeSubscription {
    /// A subscription whose sender side is held elsewhere (e.g. the in-memory
    /// source notifying directly).
    pub fn from_receiver(events: mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeSubscription {
        ChangeSubscription {
            events,
            _pump: None,
        }
    }

    /// A subscription backed by a pump task that must die with it.
    pub fn with_pump(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        pump: JoinHandle<()>,
    ) -> ChangeSubscription {
        ChangeSubscription {
            events,
            _pump: Some(AbortOnDrop(pump)),
        }
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

/// Timed-polling substitute for backends without a push channel: one
/// synthetic [`ChangeEvent::Tick`] per interval, funneled through the same
/// listener (and therefore the same coalescing and stale-discard rules).
pub fn interval_feed(period: Duration) -> ChangeSubscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let pump = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The immediate first tick is skipped; the initial fetch is the
        // caller's explicit bootstrap.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(ChangeEvent::Tick).is_err() {
                break;
            }
        }
    });
    ChangeSubscription::with_pump(rx, pump)
}

/// Handle to a running change listener. Shutting it down (or dropping it)
/// aborts the listener task and any pending coalescing timer, so no fetch
/// fires into a torn-down controller.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribe the synchronization controller to a change feed.
///
/// Bursts are coalesced on the trailing edge: each event restarts the window
/// timer, and one `fetch_all` fires once the feed has been quiet for the
/// whole window. At-least-once delivery therefore costs at most one reload
/// per burst.
pub fn spawn_change_listener(
    controller: Arc<SyncController>,
    mut subscription: ChangeSubscription,
    window: Duration,
) -> ListenerHandle {
    let task = tokio::spawn(async move {
        let mut deadline: Option<Instant> = None;
        loop {
            match deadline {
                None => match subscription.recv().await {
                    Some(event) => {
                        tracing::trace!(?event, "change event, opening coalescing window");
                        deadline = Some(Instant::now() + window);
                    }
                    None => break,
                },
                Some(when) => {
                    tokio::select! {
                        event = subscription.recv() => match event {
                            Some(event) => {
                                // Restart, do not queue: the newest event
                                // extends the quiet window.
                                tracing::trace!(?event, "change event within window");
                                deadline = Some(Instant::now() + window);
                            }
                            None => {
                                run_fetch(&controller).await;
                                break;
                            }
                        },
                        _ = tokio::time::sleep_until(when) => {
                            deadline = None;
                            run_fetch(&controller).await;
                        }
                    }
                }
            }
        }
        tracing::debug!("change feed closed, listener exiting");
    });
    ListenerHandle { task }
}

async fn run_fetch(controller: &SyncController) {
    if let Err(error) = controller.fetch_all().await {
        // fetch_all already retained the last good snapshot and raised the
        // user-facing notice; the listener just keeps going.
        tracing::warn!(%error, "change-triggered fetch failed");
    }
}
