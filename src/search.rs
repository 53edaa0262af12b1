// Copyright: Oleander Transit Dashboard contributors

use crate::models::{Route, SearchResult, Stop};
use crate::{SEARCH_MIN_QUERY_LEN, SEARCH_RESULT_CAP};
use ahash::AHashMap;
use itertools::Itertools;

/// Case-insensitive substring search over route and stop names.
///
/// Route matches come first, then stop matches, each group in source order.
/// Stop results carry their owning route's name when the reference resolves.
/// The list is truncated to [`SEARCH_RESULT_CAP`] without reordering.
/// Recomputed over the live snapshot on every call: identical query against
/// identical snapshot yields an identical result list.
pub fn search_transit(query: &str, routes: &[Route], stops: &[Stop]) -> Vec<SearchResult> {
    let query = query.trim();
    if query.chars().count() < SEARCH_MIN_QUERY_LEN {
        return Vec::new();
    }
    let needle = query.to_lowercase();

    let route_name_by_id: AHashMap<&str, &str> = routes
        .iter()
        .map(|r| (r.id.as_str(), r.name.as_str()))
        .collect();

    let route_results = routes
        .iter()
        .filter(|route| route.name.to_lowercase().contains(&needle))
        .map(|route| SearchResult::Route {
            id: route.id.clone(),
            name: route.name.clone(),
        });

    let stop_results = stops
        .iter()
        .filter(|stop| stop.name.to_lowercase().contains(&needle))
        .map(|stop| SearchResult::Stop {
            id: stop.id.clone(),
            name: stop.name.clone(),
            route_name: route_name_by_id
                .get(stop.route_id.as_str())
                .map(|name| name.to_string()),
            lat: stop.lat,
            lon: stop.lon,
        });

    route_results
        .chain(stop_results)
        .take(SEARCH_RESULT_CAP)
        .collect_vec()
}

/// Keyboard traversal state for an open search dropdown. The typed query
/// itself stays with the caller; Escape closes the list without clearing it.
#[derive(Clone, Debug, Default)]
pub struct SearchCursor {
    results: Vec<SearchResult>,
    highlight: Option<usize>,
    open: bool,
}

impl SearchCursor {
    pub fn closed() -> SearchCursor {
        SearchCursor::default()
    }

    /// Replace the result list after a query refinement. The dropdown opens
    /// only when there is something to show; the highlight resets.
    pub fn set_results(&mut self, results: Vec<SearchResult>) {
        self.open = !results.is_empty();
        self.highlight = None;
        self.results = results;
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn highlight(&self) -> Option<usize> {
        self.highlight
    }

    /// Down arrow: advance the highlight, wrapping from the last entry back
    /// to the first. With nothing highlighted yet, highlight the first.
    pub fn key_down(&mut self) {
        if !self.open || self.results.is_empty() {
            return;
        }
        self.highlight = Some(match self.highlight {
            Some(index) if index + 1 < self.results.len() => index + 1,
            Some(_) => 0,
            None => 0,
        });
    }

    /// Up arrow: move the highlight back, wrapping from the first entry to
    /// the last.
    pub fn key_up(&mut self) {
        if !self.open || self.results.is_empty() {
            return;
        }
        self.highlight = Some(match self.highlight {
            Some(0) | None => self.results.len() - 1,
            Some(index) => index - 1,
        });
    }

    /// Enter: the highlighted result, if any. No-op when nothing is
    /// highlighted.
    pub fn enter(&self) -> Option<&SearchResult> {
        if !self.open {
            return None;
        }
        self.highlight.and_then(|index| self.results.get(index))
    }

    /// Escape: close the dropdown and clear the highlight. The typed query
    /// is untouched.
    pub fn escape(&mut self) {
        self.open = false;
        self.highlight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, name: &str) -> Route {
        Route {
            id: id.into(),
            name: name.to_string(),
            shape: Vec::new(),
            color: None,
        }
    }

    fn stop(id: &str, route_id: &str, name: &str, order: i32) -> Stop {
        Stop {
            id: id.into(),
            route_id: route_id.into(),
            name: name.to_string(),
            lat: 40.75,
            lon: -73.98,
            stop_order: order,
        }
    }

    #[test]
    fn short_queries_return_nothing() {
        let routes = vec![route("r1", "Blue Line Express")];
        assert!(search_transit("", &routes, &[]).is_empty());
        assert!(search_transit("a", &routes, &[]).is_empty());
        assert!(search_transit(" b ", &routes, &[]).is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let routes = vec![route("r1", "Blue Line Express")];
        let results = search_transit("bLuE", &routes, &[]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name(), "Blue Line Express");
    }

    #[test]
    fn routes_come_before_stops() {
        let routes = vec![route("r1", "Blue Line")];
        let stops = vec![stop("s1", "r1", "Blue Stop", 1)];
        let results = search_transit("blue", &routes, &stops);

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], SearchResult::Route { .. }));
        match &results[1] {
            SearchResult::Stop { route_name, .. } => {
                assert_eq!(route_name.as_deref(), Some("Blue Line"));
            }
            other => panic!("expected stop result, got {:?}", other),
        }
    }

    #[test]
    fn stop_with_unresolvable_route_still_matches() {
        let stops = vec![stop("s1", "missing", "Central Park North", 1)];
        let results = search_transit("central", &[], &stops);
        match &results[0] {
            SearchResult::Stop { route_name, .. } => assert!(route_name.is_none()),
            other => panic!("expected stop result, got {:?}", other),
        }
    }

    #[test]
    fn result_list_is_capped_without_reordering() {
        let routes = vec![route("r1", "Terminal Loop")];
        let stops: Vec<Stop> = (0..10)
            .map(|i| stop(&format!("s{}", i), "r1", &format!("Terminal {}", i), i))
            .collect();
        let results = search_transit("terminal", &routes, &stops);

        assert_eq!(results.len(), SEARCH_RESULT_CAP);
        assert!(matches!(results[0], SearchResult::Route { .. }));
        // Remaining entries keep stop source order.
        match &results[1] {
            SearchResult::Stop { name, .. } => assert_eq!(name, "Terminal 0"),
            other => panic!("expected stop result, got {:?}", other),
        }
    }

    #[test]
    fn identical_query_identical_snapshot_identical_results() {
        let routes = vec![route("r1", "Green Line Local")];
        let stops = vec![stop("s1", "r1", "Green Street", 1)];
        assert_eq!(
            search_transit("green", &routes, &stops),
            search_transit("green", &routes, &stops)
        );
    }

    #[test]
    fn cursor_wraps_both_directions() {
        let mut cursor = SearchCursor::closed();
        cursor.set_results(search_transit(
            "blue",
            &[route("r1", "Blue Line")],
            &[stop("s1", "r1", "Blue Stop", 1)],
        ));

        assert!(cursor.is_open());
        assert_eq!(cursor.highlight(), None);

        cursor.key_down();
        assert_eq!(cursor.highlight(), Some(0));
        cursor.key_down();
        assert_eq!(cursor.highlight(), Some(1));
        cursor.key_down();
        assert_eq!(cursor.highlight(), Some(0)); // wrap last -> first

        cursor.key_up();
        assert_eq!(cursor.highlight(), Some(1)); // wrap first -> last
    }

    #[test]
    fn cursor_up_from_nothing_highlights_last() {
        let mut cursor = SearchCursor::closed();
        cursor.set_results(vec![
            SearchResult::Route {
                id: "r1".into(),
                name: "Blue Line".to_string(),
            },
            SearchResult::Route {
                id: "r2".into(),
                name: "Blue Express".to_string(),
            },
        ]);
        cursor.key_up();
        assert_eq!(cursor.highlight(), Some(1));
    }

    #[test]
    fn enter_without_highlight_is_noop() {
        let mut cursor = SearchCursor::closed();
        cursor.set_results(vec![SearchResult::Route {
            id: "r1".into(),
            name: "Blue Line".to_string(),
        }]);
        assert!(cursor.enter().is_none());

        cursor.key_down();
        assert_eq!(cursor.enter().map(|r| r.name()), Some("Blue Line"));
    }

    #[test]
    fn escape_closes_and_clears_highlight() {
        let mut cursor = SearchCursor::closed();
        cursor.set_results(vec![SearchResult::Route {
            id: "r1".into(),
            name: "Blue Line".to_string(),
        }]);
        cursor.key_down();
        cursor.escape();

        assert!(!cursor.is_open());
        assert_eq!(cursor.highlight(), None);
        assert!(cursor.enter().is_none());
    }

    #[test]
    fn empty_results_keep_cursor_closed() {
        let mut cursor = SearchCursor::closed();
        cursor.set_results(Vec::new());
        assert!(!cursor.is_open());
        cursor.key_down();
        assert_eq!(cursor.highlight(), None);
    }
}
