// Copyright: Oleander Transit Dashboard contributors

use crate::models::{FocusTarget, Notice, SearchResult, SelectionState};
use crate::store::DashboardSnapshot;
use crate::{ROUTE_RESULT_ZOOM, STOP_FOCUS_ZOOM, VEHICLE_FOCUS_ZOOM};
use tokio::sync::{broadcast, watch};

/// Single source of truth for "which vehicle is selected" and "where the map
/// should look", arbitrating between map clicks, sidebar clicks, search
/// results and programmatic focus.
///
/// An explicitly owned context object, not a global: it is built from the
/// sync controller's snapshot stream and notice sender and passed to
/// whoever issues commands.
pub struct SelectionContext {
    snapshot_rx: watch::Receiver<DashboardSnapshot>,
    state_tx: watch::Sender<SelectionState>,
    notice_tx: broadcast::Sender<Notice>,
}

impl SelectionContext {
    pub fn new(
        snapshot_rx: watch::Receiver<DashboardSnapshot>,
        notice_tx: broadcast::Sender<Notice>,
    ) -> SelectionContext {
        let (state_tx, _) = watch::channel(SelectionState::default());
        SelectionContext {
            snapshot_rx,
            state_tx,
            notice_tx,
        }
    }

    pub fn current(&self) -> SelectionState {
        self.state_tx.borrow().clone()
    }

    /// Watch stream of resolved selection states.
    pub fn state_rx(&self) -> watch::Receiver<SelectionState> {
        self.state_tx.subscribe()
    }

    /// Select a vehicle (map click, sidebar click). With a known position
    /// the focus retargets to it atomically, at close zoom; without one the
    /// selection is still recorded and the focus stays where it was.
    pub fn select_vehicle(&self, vehicle_id: &str) {
        let focus = self
            .snapshot_rx
            .borrow()
            .vehicle(vehicle_id)
            .and_then(|v| v.position.as_ref())
            .map(|position| FocusTarget {
                lat: position.lat,
                lon: position.lon,
                zoom: VEHICLE_FOCUS_ZOOM,
            });

        tracing::debug!(vehicle_id, focused = focus.is_some(), "vehicle selected");
        self.state_tx.send_modify(|state| {
            state.selected_vehicle_id = Some(vehicle_id.into());
            if let Some(focus) = focus {
                state.focus = Some(focus);
            }
        });
    }

    /// Retarget the map viewport without touching the selected vehicle.
    pub fn focus_on(&self, lat: f64, lon: f64, zoom: u8) {
        self.state_tx.send_modify(|state| {
            state.focus = Some(FocusTarget { lat, lon, zoom });
        });
    }

    /// Explicit deselection (detail panel closed). The focus target is kept;
    /// the map does not snap away from where the user was looking.
    pub fn deselect(&self) {
        self.state_tx.send_modify(|state| {
            state.selected_vehicle_id = None;
        });
    }

    /// Apply a chosen search result.
    ///
    /// Route result: the first vehicle in store order on that route, if it
    /// has a position, becomes the selection and focus. A route with no live
    /// vehicle raises one informational notice and changes nothing.
    /// Stop result: focus only, selection untouched.
    pub fn apply_search_result(&self, result: &SearchResult) {
        match result {
            SearchResult::Route { id, name } => {
                let target = {
                    let snapshot = self.snapshot_rx.borrow();
                    snapshot
                        .first_vehicle_on_route(id.as_str())
                        .and_then(|view| {
                            view.position
                                .as_ref()
                                .map(|p| (view.vehicle.id.clone(), p.lat, p.lon))
                        })
                };
                match target {
                    Some((vehicle_id, lat, lon)) => {
                        tracing::debug!(route = %id, vehicle = %vehicle_id, "route result resolved to vehicle");
                        self.state_tx.send_modify(|state| {
                            state.selected_vehicle_id = Some(vehicle_id);
                            state.focus = Some(FocusTarget {
                                lat,
                                lon,
                                zoom: ROUTE_RESULT_ZOOM,
                            });
                        });
                    }
                    None => {
                        let _ = self.notice_tx.send(Notice::info(
                            "Route found",
                            format!("{} - No active vehicles currently", name),
                        ));
                    }
                }
            }
            SearchResult::Stop { name, lat, lon, .. } => {
                self.focus_on(*lat, *lon, STOP_FOCUS_ZOOM);
                let _ = self
                    .notice_tx
                    .send(Notice::info("Stop located", format!("Showing {}", name)));
            }
        }
    }
}
