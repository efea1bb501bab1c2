//! Session Context
//!
//! The session context says *whose* state is being read or written and
//! *which* component (if any) is rendering. It is passed explicitly to every
//! cell operation instead of living in thread-local storage, so crossing a
//! thread boundary (a background worker, a flusher) is just a clone.
//!
//! # Tracking
//!
//! While a component id is set, every cell read registers that component
//! as a dependent of the cell's state name. The renderer derives a
//! component context with [`SessionContext::for_component`] for the
//! duration of one build call; code outside rendering uses a context with
//! no component and its reads are not tracked.

use std::fmt;
use std::sync::Arc;

use crate::session::{ComponentId, SessionId, SessionRegistry, SessionStore};

/// Explicit "current session / current component" for cell operations.
#[derive(Clone)]
pub struct SessionContext {
    registry: Arc<SessionRegistry>,
    session_id: Option<SessionId>,
    component: Option<ComponentId>,
}

impl SessionContext {
    /// Context for `session_id`; `None` addresses the static scope.
    pub fn new(registry: Arc<SessionRegistry>, session_id: Option<SessionId>) -> Self {
        Self {
            registry,
            session_id,
            component: None,
        }
    }

    /// Context for the static, pre-session scope.
    pub fn static_scope(registry: Arc<SessionRegistry>) -> Self {
        Self::new(registry, None)
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Component currently rendering, if any.
    pub fn component(&self) -> Option<&ComponentId> {
        self.component.as_ref()
    }

    /// Whether reads through this context register dependencies.
    pub fn is_tracking(&self) -> bool {
        self.component.is_some()
    }

    /// Derive the render context of one component's build call.
    pub fn for_component(&self, component: ComponentId) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            session_id: self.session_id.clone(),
            component: Some(component),
        }
    }

    /// Same session, no active component.
    pub fn without_component(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            session_id: self.session_id.clone(),
            component: None,
        }
    }

    /// Same registry, another session, no active component.
    pub fn for_session(&self, session_id: Option<SessionId>) -> Self {
        Self::new(Arc::clone(&self.registry), session_id)
    }

    /// Resolve the store this context addresses.
    ///
    /// Refreshes the session's TTL, or recreates the store if it expired.
    pub fn store(&self) -> Arc<SessionStore> {
        self.registry.get_store(self.session_id.as_ref())
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("component", &self.component)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::with_limits(16, Duration::from_secs(60)))
    }

    #[test]
    fn context_tracks_component() {
        let ctx = SessionContext::new(registry(), Some(SessionId::from("s")));
        assert!(!ctx.is_tracking());
        assert!(ctx.component().is_none());

        let render = ctx.for_component(ComponentId::from("text_1"));
        assert!(render.is_tracking());
        assert_eq!(render.component(), Some(&ComponentId::from("text_1")));
        assert_eq!(render.session_id(), ctx.session_id());

        // The derived context leaves its parent untouched.
        assert!(!ctx.is_tracking());
        assert!(!render.without_component().is_tracking());
    }

    #[test]
    fn static_scope_resolves_static_store() {
        let ctx = SessionContext::static_scope(registry());
        assert!(ctx.session_id().is_none());
        assert!(ctx.store().is_static());
    }

    #[test]
    fn for_session_switches_scope() {
        let ctx = SessionContext::static_scope(registry());
        let session = ctx.for_session(Some(SessionId::from("s")));
        assert_eq!(session.store().session_id(), Some(&SessionId::from("s")));
        assert!(Arc::ptr_eq(ctx.registry(), session.registry()));
    }
}
