//! Dependency Tracker
//!
//! Records which components read which state names during their last
//! render pass. When a state name changes, the tracker answers "which
//! components must be rebuilt", and nothing else.
//!
//! # Lifecycle of an Entry
//!
//! 1. A component's builder runs with that component active in the context.
//! 2. Every cell read inside the builder registers `(state name, component)`.
//! 3. Before the component is rebuilt (or when it is removed for good) the
//!    renderer calls [`DependencyTracker::unregister_component`], which drops
//!    the component from every set and prunes names left without readers.
//!
//! Sets are insertion-ordered so dirty components come out in the order
//! they first subscribed.

use indexmap::{IndexMap, IndexSet};

use crate::session::ComponentId;

/// Map from state name to the components that read it.
#[derive(Debug, Default, Clone)]
pub struct DependencyTracker {
    subscribers: IndexMap<String, IndexSet<ComponentId>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `component_id` read `state_name`. Idempotent.
    pub fn register_dependency(&mut self, state_name: &str, component_id: &ComponentId) {
        match self.subscribers.get_mut(state_name) {
            Some(components) => {
                components.insert(component_id.clone());
            }
            None => {
                let mut components = IndexSet::new();
                components.insert(component_id.clone());
                self.subscribers.insert(state_name.to_string(), components);
            }
        }
    }

    /// Components depending on `state_name`; empty when nothing reads it.
    pub fn get_dirty_components(&self, state_name: &str) -> IndexSet<ComponentId> {
        self.subscribers
            .get(state_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove a component from every subscriber set.
    ///
    /// State names whose set becomes empty are deleted, so the tracker never
    /// accumulates dead entries.
    pub fn unregister_component(&mut self, component_id: &ComponentId) {
        self.subscribers.retain(|_, components| {
            components.shift_remove(component_id);
            !components.is_empty()
        });
    }

    /// Whether `component_id` currently depends on `state_name`.
    pub fn depends_on(&self, state_name: &str, component_id: &ComponentId) -> bool {
        self.subscribers
            .get(state_name)
            .is_some_and(|components| components.contains(component_id))
    }

    /// Number of tracked state names.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Tracked state names, in first-registration order.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.subscribers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(id: &str) -> ComponentId {
        ComponentId::from(id)
    }

    #[test]
    fn registration_is_idempotent() {
        let mut tracker = DependencyTracker::new();
        tracker.register_dependency("count", &cid("text_1"));
        tracker.register_dependency("count", &cid("text_1"));

        let dirty = tracker.get_dirty_components("count");
        assert_eq!(dirty.len(), 1);
        assert!(dirty.contains(&cid("text_1")));
    }

    #[test]
    fn unknown_name_yields_empty_set() {
        let tracker = DependencyTracker::new();
        assert!(tracker.get_dirty_components("missing").is_empty());
    }

    #[test]
    fn unrelated_names_stay_independent() {
        let mut tracker = DependencyTracker::new();
        tracker.register_dependency("count", &cid("text_1"));
        tracker.register_dependency("label", &cid("text_2"));

        assert!(!tracker.get_dirty_components("label").contains(&cid("text_1")));
        assert!(!tracker.get_dirty_components("count").contains(&cid("text_2")));
    }

    #[test]
    fn unregister_prunes_empty_names() {
        let mut tracker = DependencyTracker::new();
        tracker.register_dependency("count", &cid("text_1"));
        tracker.register_dependency("count", &cid("text_2"));
        tracker.register_dependency("label", &cid("text_1"));

        tracker.unregister_component(&cid("text_1"));

        assert!(!tracker.depends_on("count", &cid("text_1")));
        assert!(tracker.depends_on("count", &cid("text_2")));
        // "label" only had text_1, so it is gone entirely
        assert_eq!(tracker.state_names().collect::<Vec<_>>(), vec!["count"]);

        tracker.unregister_component(&cid("text_2"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn dirty_components_keep_subscription_order() {
        let mut tracker = DependencyTracker::new();
        for id in ["c", "a", "b"] {
            tracker.register_dependency("count", &cid(id));
        }
        let order: Vec<_> = tracker
            .get_dirty_components("count")
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
