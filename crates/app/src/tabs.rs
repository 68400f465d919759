use std::collections::{BTreeMap, HashMap};

use meter_core::TabId;

#[derive(Debug, Clone)]
pub struct Tab {
    pub origin: Option<String>,
    pub window_id: i64,
    pub active: bool,
}

/// In-memory mirror of the browser's open tabs, fed by tab lifecycle events.
/// Resolves which top-level origin owns a request's tab and which origins
/// still have a foreground tab.
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: HashMap<TabId, Tab>,
}

impl TabRegistry {
    pub fn navigated(&mut self, tab_id: TabId, origin: Option<String>, window_id: i64, active: bool) {
        if active {
            for tab in self.tabs.values_mut() {
                if tab.window_id == window_id {
                    tab.active = false;
                }
            }
        }
        self.tabs.insert(
            tab_id,
            Tab {
                origin,
                window_id,
                active,
            },
        );
    }

    /// Marks the tab as its window's foreground tab. Returns the tab's origin
    /// so the caller can clear background-activity bookkeeping.
    pub fn activated(&mut self, tab_id: TabId) -> Option<String> {
        let window_id = self.tabs.get(&tab_id)?.window_id;
        for (id, tab) in self.tabs.iter_mut() {
            if tab.window_id == window_id {
                tab.active = *id == tab_id;
            }
        }
        self.tabs.get(&tab_id).and_then(|tab| tab.origin.clone())
    }

    pub fn removed(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
    }

    pub fn get(&self, tab_id: TabId) -> Option<&Tab> {
        self.tabs.get(&tab_id)
    }

    pub fn origin_of(&self, tab_id: TabId) -> Option<&str> {
        self.tabs.get(&tab_id)?.origin.as_deref()
    }

    pub fn has_active_tab(&self, origin: &str) -> bool {
        self.tabs
            .values()
            .any(|tab| tab.active && tab.origin.as_deref() == Some(origin))
    }

    /// Open tabs grouped by origin, ordered by tab id within each group.
    pub fn by_origin(&self) -> BTreeMap<String, Vec<(TabId, &Tab)>> {
        let mut grouped: BTreeMap<String, Vec<(TabId, &Tab)>> = BTreeMap::new();
        for (id, tab) in &self.tabs {
            if let Some(origin) = &tab.origin {
                grouped.entry(origin.clone()).or_default().push((*id, tab));
            }
        }
        for tabs in grouped.values_mut() {
            tabs.sort_by_key(|(id, _)| *id);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_is_exclusive_per_window() {
        let mut tabs = TabRegistry::default();
        tabs.navigated(1, Some("a.example".to_string()), 10, true);
        tabs.navigated(2, Some("b.example".to_string()), 10, false);
        tabs.navigated(3, Some("c.example".to_string()), 20, true);

        let origin = tabs.activated(2);
        assert_eq!(origin.as_deref(), Some("b.example"));
        assert!(!tabs.get(1).map(|tab| tab.active).unwrap_or(true));
        assert!(tabs.get(2).map(|tab| tab.active).unwrap_or(false));
        // The other window keeps its own foreground tab.
        assert!(tabs.get(3).map(|tab| tab.active).unwrap_or(false));
    }

    #[test]
    fn has_active_tab_tracks_navigation() {
        let mut tabs = TabRegistry::default();
        tabs.navigated(1, Some("a.example".to_string()), 10, true);
        assert!(tabs.has_active_tab("a.example"));

        tabs.navigated(1, Some("b.example".to_string()), 10, true);
        assert!(!tabs.has_active_tab("a.example"));
        assert!(tabs.has_active_tab("b.example"));

        tabs.removed(1);
        assert!(!tabs.has_active_tab("b.example"));
        assert!(tabs.is_empty());
    }

    #[test]
    fn by_origin_groups_and_orders_tabs() {
        let mut tabs = TabRegistry::default();
        tabs.navigated(5, Some("a.example".to_string()), 10, false);
        tabs.navigated(2, Some("a.example".to_string()), 10, true);
        tabs.navigated(9, None, 10, false);

        let grouped = tabs.by_origin();
        assert_eq!(grouped.len(), 1);
        let ids: Vec<TabId> = grouped["a.example"].iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 5]);
    }
}
