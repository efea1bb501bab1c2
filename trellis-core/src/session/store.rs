//! Session Store
//!
//! One [`SessionStore`] holds everything reactive about one scope: state
//! values, the dependency tracker, the dirty-name set, and the component
//! registry (builders, action handlers, fragment children, page order).
//!
//! # Concurrency
//!
//! A store is shared between the render path, background work functions,
//! and flusher threads. Each field has its own lock, so every individual
//! operation is atomic, but a sequence of operations (read a value, then
//! write it back) is not. Draining the dirty set is a single swap, so two
//! racing flushes never deliver the same names twice and never lose one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::{ComponentId, SessionId};
use crate::reactive::{DependencyTracker, SessionContext};
use crate::value::Value;

/// Zero-argument render function of one component (context aside).
pub type Builder = Arc<dyn Fn(&SessionContext) -> String + Send + Sync>;

/// Handler for a client event addressed to one component.
pub type Action = Arc<dyn Fn(&SessionContext, &Value) + Send + Sync>;

/// Reactive state of one session, or of the static pre-session scope.
pub struct SessionStore {
    session_id: Option<SessionId>,
    states: RwLock<IndexMap<String, Value>>,
    tracker: Mutex<DependencyTracker>,
    dirty_names: Mutex<IndexSet<String>>,
    builders: DashMap<ComponentId, Builder>,
    actions: DashMap<ComponentId, Action>,
    fragments: DashMap<ComponentId, Vec<ComponentId>>,
    order: Mutex<Vec<ComponentId>>,
    sidebar_order: Mutex<Vec<ComponentId>>,
    component_count: AtomicU64,
}

impl SessionStore {
    /// Create an empty store whose component counter starts at `base_count`.
    pub fn new(session_id: Option<SessionId>, base_count: u64) -> Self {
        Self {
            session_id,
            states: RwLock::new(IndexMap::new()),
            tracker: Mutex::new(DependencyTracker::new()),
            dirty_names: Mutex::new(IndexSet::new()),
            builders: DashMap::new(),
            actions: DashMap::new(),
            fragments: DashMap::new(),
            order: Mutex::new(Vec::new()),
            sidebar_order: Mutex::new(Vec::new()),
            component_count: AtomicU64::new(base_count),
        }
    }

    /// Owning session, or `None` for the static store.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn is_static(&self) -> bool {
        self.session_id.is_none()
    }

    // ------------------------------------------------------------------------
    // State values
    // ------------------------------------------------------------------------

    /// Stored value for `name`, if one was ever written.
    pub fn state(&self, name: &str) -> Option<Value> {
        self.states.read().get(name).cloned()
    }

    /// Write a value and return the one it replaced.
    pub fn write_state(&self, name: &str, value: Value) -> Option<Value> {
        self.states.write().insert(name.to_string(), value)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.read().contains_key(name)
    }

    pub fn state_count(&self) -> usize {
        self.states.read().len()
    }

    /// Copy of every stored value, in first-write order.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.states.read().clone()
    }

    // ------------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------------

    pub fn mark_dirty(&self, name: &str) {
        self.dirty_names.lock().insert(name.to_string());
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty_names.lock().is_empty()
    }

    /// Names changed since the last drain, without draining them.
    pub fn dirty_names(&self) -> Vec<String> {
        self.dirty_names.lock().iter().cloned().collect()
    }

    /// Atomically take every dirty name, leaving the set empty.
    pub fn take_dirty_names(&self) -> IndexSet<String> {
        std::mem::take(&mut *self.dirty_names.lock())
    }

    /// Drain the dirty names and resolve them to dependent components.
    pub fn take_dirty_components(&self) -> IndexSet<ComponentId> {
        let names = self.take_dirty_names();
        if names.is_empty() {
            return IndexSet::new();
        }
        let tracker = self.tracker.lock();
        let mut components = IndexSet::new();
        for name in &names {
            components.extend(tracker.get_dirty_components(name));
        }
        components
    }

    // ------------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------------

    /// Exclusive access to this session's tracker.
    pub fn tracker(&self) -> MutexGuard<'_, DependencyTracker> {
        self.tracker.lock()
    }

    pub fn register_dependency(&self, state_name: &str, component_id: &ComponentId) {
        self.tracker.lock().register_dependency(state_name, component_id);
    }

    pub fn unregister_component(&self, component_id: &ComponentId) {
        self.tracker.lock().unregister_component(component_id);
    }

    // ------------------------------------------------------------------------
    // Component registry
    // ------------------------------------------------------------------------

    /// Allocate the next component id, `<kind>_<n>`.
    pub fn next_component_id(&self, kind: &str) -> ComponentId {
        let n = self.component_count.fetch_add(1, Ordering::Relaxed);
        ComponentId::new(format!("{kind}_{n}"))
    }

    pub fn component_count(&self) -> u64 {
        self.component_count.load(Ordering::Relaxed)
    }

    pub fn register_component<F>(&self, component_id: ComponentId, builder: F)
    where
        F: Fn(&SessionContext) -> String + Send + Sync + 'static,
    {
        self.builders.insert(component_id, Arc::new(builder));
    }

    /// Builder for `component_id`; cloned out so no map guard is held while
    /// it runs.
    pub fn builder(&self, component_id: &ComponentId) -> Option<Builder> {
        self.builders
            .get(component_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Forget a component entirely: builder, action, and dependencies.
    pub fn remove_component(&self, component_id: &ComponentId) {
        self.builders.remove(component_id);
        self.actions.remove(component_id);
        self.fragments.remove(component_id);
        self.unregister_component(component_id);
    }

    pub fn register_action<F>(&self, component_id: ComponentId, action: F)
    where
        F: Fn(&SessionContext, &Value) + Send + Sync + 'static,
    {
        self.actions.insert(component_id, Arc::new(action));
    }

    pub fn action(&self, component_id: &ComponentId) -> Option<Action> {
        self.actions
            .get(component_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Record `child` as rendered inside the container `parent`.
    pub fn add_fragment_child(&self, parent: ComponentId, child: ComponentId) {
        self.fragments.entry(parent).or_default().push(child);
    }

    pub fn fragment_children(&self, parent: &ComponentId) -> Vec<ComponentId> {
        self.fragments
            .get(parent)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Append to the main page order.
    pub fn push_order(&self, component_id: ComponentId) {
        self.order.lock().push(component_id);
    }

    pub fn order(&self) -> Vec<ComponentId> {
        self.order.lock().clone()
    }

    /// Append to the sidebar order.
    pub fn push_sidebar_order(&self, component_id: ComponentId) {
        self.sidebar_order.lock().push(component_id);
    }

    pub fn sidebar_order(&self) -> Vec<ComponentId> {
        self.sidebar_order.lock().clone()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("session_id", &self.session_id)
            .field("state_count", &self.state_count())
            .field("dirty", &self.dirty_names())
            .field("builders", &self.builders.len())
            .field("component_count", &self.component_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_returns_previous_value() {
        let store = SessionStore::new(Some(SessionId::from("s")), 0);
        assert_eq!(store.write_state("count", Value::Int(1)), None);
        assert_eq!(store.write_state("count", Value::Int(2)), Some(Value::Int(1)));
        assert_eq!(store.state("count"), Some(Value::Int(2)));
    }

    #[test]
    fn take_dirty_names_drains_once() {
        let store = SessionStore::new(None, 0);
        store.mark_dirty("a");
        store.mark_dirty("b");
        store.mark_dirty("a");

        let names: Vec<_> = store.take_dirty_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(store.take_dirty_names().is_empty());
        assert!(!store.has_dirty());
    }

    #[test]
    fn dirty_components_follow_tracker() {
        let store = SessionStore::new(None, 0);
        let text = ComponentId::from("text_0");
        let badge = ComponentId::from("badge_1");
        store.register_dependency("count", &text);
        store.register_dependency("label", &badge);

        store.mark_dirty("count");
        let dirty = store.take_dirty_components();
        assert!(dirty.contains(&text));
        assert!(!dirty.contains(&badge));
    }

    #[test]
    fn component_ids_continue_from_base_count() {
        let store = SessionStore::new(Some(SessionId::from("s")), 7);
        assert_eq!(store.next_component_id("button").as_str(), "button_7");
        assert_eq!(store.next_component_id("text").as_str(), "text_8");
        assert_eq!(store.component_count(), 9);
    }

    #[test]
    fn remove_component_clears_every_registry() {
        let store = SessionStore::new(None, 0);
        let cid = store.next_component_id("checkbox");
        store.register_component(cid.clone(), |_| "<input>".to_string());
        store.register_action(cid.clone(), |_, _| {});
        store.register_dependency("checked", &cid);

        store.remove_component(&cid);

        assert!(store.builder(&cid).is_none());
        assert!(store.action(&cid).is_none());
        assert!(store.tracker().is_empty());
    }

    #[test]
    fn fragments_and_order_lists() {
        let store = SessionStore::new(None, 0);
        let card = ComponentId::from("card_0");
        store.add_fragment_child(card.clone(), ComponentId::from("text_1"));
        store.add_fragment_child(card.clone(), ComponentId::from("text_2"));
        store.push_order(card.clone());
        store.push_sidebar_order(ComponentId::from("nav_3"));

        assert_eq!(store.fragment_children(&card).len(), 2);
        assert_eq!(store.order(), vec![card]);
        assert_eq!(store.sidebar_order(), vec![ComponentId::from("nav_3")]);
    }
}
