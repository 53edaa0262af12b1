// Copyright: Oleander Transit Dashboard contributors
// Live data synchronization core for the Oleander vehicle tracking dashboard

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_unit_value,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect
)]

#[macro_use]
extern crate serde;

pub mod change_feed;
pub mod datasource;
pub mod merge;
pub mod models;
pub mod pg_source;
pub mod search;
pub mod selection;
pub mod store;
pub mod sync;

/// Queries shorter than this return nothing instead of scanning the whole
/// store on every keystroke.
pub const SEARCH_MIN_QUERY_LEN: usize = 2;

/// Hard cap on the number of search results handed to the dropdown.
pub const SEARCH_RESULT_CAP: usize = 8;

/// Zoom applied when selecting a vehicle with a known position.
pub const VEHICLE_FOCUS_ZOOM: u8 = 15;

/// Zoom applied when a route search result resolves to a live vehicle.
pub const ROUTE_RESULT_ZOOM: u8 = 14;

/// Zoom applied when focusing a stop from a search result.
pub const STOP_FOCUS_ZOOM: u8 = 16;

/// Trailing-edge window for coalescing change-feed bursts into one refetch.
pub const CHANGE_COALESCE_WINDOW_MS: u64 = 250;
