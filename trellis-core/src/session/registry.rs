//! Session Registry
//!
//! Owns every [`SessionStore`]: one static store for content built before
//! any session exists, and a TTL-evicted cache of per-session stores.
//!
//! Stores are created lazily on first access. A session that stays
//! untouched for longer than the TTL is dropped silently and recreated
//! empty on its next access; its component counter is re-seeded from the
//! static store so component ids never collide between the two scopes.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::cache::TtlCache;
use super::{SessionId, SessionStore};
use crate::config::RuntimeConfig;

/// Registry of the static store and all live session stores.
#[derive(Debug)]
pub struct SessionRegistry {
    static_store: OnceLock<Arc<SessionStore>>,
    sessions: Mutex<TtlCache<SessionId, Arc<SessionStore>>>,
}

impl SessionRegistry {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_limits(config.session_capacity, config.session_ttl())
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            static_store: OnceLock::new(),
            sessions: Mutex::new(TtlCache::new(capacity, ttl)),
        }
    }

    /// The non-expiring store of the pre-session scope.
    pub fn static_store(&self) -> Arc<SessionStore> {
        Arc::clone(
            self.static_store
                .get_or_init(|| Arc::new(SessionStore::new(None, 0))),
        )
    }

    /// Resolve the store for `session_id`, creating it if needed.
    ///
    /// `None` resolves to the static store. A hit refreshes the session's
    /// TTL.
    pub fn get_store(&self, session_id: Option<&SessionId>) -> Arc<SessionStore> {
        match session_id {
            None => self.static_store(),
            Some(id) => self.get_session_store_at(id, Instant::now()),
        }
    }

    pub(crate) fn get_session_store_at(&self, id: &SessionId, now: Instant) -> Arc<SessionStore> {
        let mut sessions = self.sessions.lock();
        if let Some(store) = sessions.get_at(id, now) {
            return Arc::clone(store);
        }

        let base_count = self.static_store().component_count();
        let store = Arc::new(SessionStore::new(Some(id.clone()), base_count));
        let evicted = sessions.insert_at(id.clone(), Arc::clone(&store), now);
        debug!(
            session = %id.short(),
            base_count,
            evicted,
            "created session store"
        );
        store
    }

    /// Whether a live store exists for `session_id`. Does not refresh it.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.lock().contains_at(session_id, Instant::now())
    }

    /// Drop expired session stores now instead of on next touch.
    pub fn purge_expired(&self) -> usize {
        self.sessions.lock().purge_expired_at(Instant::now())
    }

    /// Number of session stores held, not counting the static store.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drop every session store. The static store survives.
    pub fn clear(&self) {
        self.sessions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const TTL: Duration = Duration::from_secs(1800);

    fn registry() -> SessionRegistry {
        SessionRegistry::with_limits(1000, TTL)
    }

    #[test]
    fn none_resolves_to_static_store() {
        let registry = registry();
        let a = registry.get_store(None);
        let b = registry.get_store(None);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_static());
        assert!(registry.is_empty());
    }

    #[test]
    fn sessions_are_created_lazily_and_reused() {
        let registry = registry();
        let id = SessionId::from("alpha");
        assert!(!registry.contains(&id));

        let first = registry.get_store(Some(&id));
        let second = registry.get_store(Some(&id));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.session_id(), Some(&id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn new_session_seeds_component_count_from_static() {
        let registry = registry();
        let static_store = registry.static_store();
        for _ in 0..5 {
            static_store.next_component_id("text");
        }

        let store = registry.get_store(Some(&SessionId::from("alpha")));
        assert_eq!(store.component_count(), 5);
        assert_eq!(store.next_component_id("button").as_str(), "button_5");
    }

    #[test]
    fn expired_session_is_recreated_empty() {
        let registry = registry();
        let id = SessionId::from("alpha");
        let start = Instant::now();

        let store = registry.get_session_store_at(&id, start);
        store.write_state("count", Value::Int(5));
        registry.static_store().next_component_id("text");

        let later = start + TTL + Duration::from_secs(1);
        let recreated = registry.get_session_store_at(&id, later);

        assert!(!Arc::ptr_eq(&store, &recreated));
        assert_eq!(recreated.state("count"), None);
        assert_eq!(recreated.component_count(), 1);
    }

    #[test]
    fn access_within_ttl_keeps_the_store_alive() {
        let registry = registry();
        let id = SessionId::from("alpha");
        let start = Instant::now();

        let store = registry.get_session_store_at(&id, start);
        let touch = start + TTL - Duration::from_secs(1);
        registry.get_session_store_at(&id, touch);

        let later = start + TTL + Duration::from_secs(60);
        let same = registry.get_session_store_at(&id, later);
        assert!(Arc::ptr_eq(&store, &same));
    }

    #[test]
    fn capacity_evicts_least_recent_session() {
        let registry = SessionRegistry::with_limits(2, TTL);
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        let c = SessionId::from("c");

        registry.get_store(Some(&a));
        registry.get_store(Some(&b));
        registry.get_store(Some(&a));
        registry.get_store(Some(&c));

        assert!(registry.contains(&a));
        assert!(!registry.contains(&b));
        assert!(registry.contains(&c));
    }
}
