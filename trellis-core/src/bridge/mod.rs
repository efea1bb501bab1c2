//! Dirty Push Bridge
//!
//! Delivers a session's re-rendered components to its live connection from
//! threads that are not the connection's own execution context, typically
//! background workers and their flushers.
//!
//! # Delivery Paths
//!
//! The connection layer serves every socket from one tokio runtime, the
//! "main loop", and hands the bridge its [`Handle`] with
//! [`DirtyPushBridge::attach_main_loop`]. From then on:
//!
//! - From a plain thread, the push future is spawned onto the main loop
//!   and the thread blocks until it finishes or the push timeout expires.
//! - From inside a tokio runtime, the push is spawned and not awaited, so a
//!   runtime worker is never blocked.
//! - Before any loop is attached, a throwaway current-thread runtime runs
//!   the push to completion. This path only exists for setups without a
//!   persistent connection loop.
//!
//! Every failure is logged and swallowed. Delivery never changes task
//! state.

mod batch;
mod render;

pub use batch::RenderedBatch;
pub use render::BuilderRenderer;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::reactive::SessionContext;
use crate::session::{ComponentId, SessionId};

/// Connection layer seen from the core.
pub trait UpdateSink: Send + Sync {
    /// Whether `session_id` currently has a live connection.
    fn is_connected(&self, session_id: &SessionId) -> bool;

    /// Ship a batch to the session's connection.
    fn push_updates(&self, batch: RenderedBatch) -> BoxFuture<'static, Result<(), DeliveryError>>;
}

/// Produces the re-rendered output of a session's dirty components.
pub trait DirtyRenderer: Send + Sync {
    /// Render everything dirty in the context's session. An empty map
    /// means there was nothing to do.
    fn render_dirty(&self, ctx: &SessionContext) -> IndexMap<ComponentId, String>;
}

/// Sink for runtimes with no connection layer: no session is ever
/// connected, so nothing is pushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedSink;

impl UpdateSink for DisconnectedSink {
    fn is_connected(&self, _session_id: &SessionId) -> bool {
        false
    }

    fn push_updates(&self, batch: RenderedBatch) -> BoxFuture<'static, Result<(), DeliveryError>> {
        let session = batch.session_id;
        Box::pin(async move {
            Err(DeliveryError::Transport(format!("session {session} is not connected")))
        })
    }
}

/// Marshals dirty output from worker threads onto the main loop.
pub struct DirtyPushBridge {
    renderer: Arc<dyn DirtyRenderer>,
    sink: Arc<dyn UpdateSink>,
    main_loop: RwLock<Option<Handle>>,
    push_timeout: Duration,
}

impl DirtyPushBridge {
    pub fn new(
        renderer: Arc<dyn DirtyRenderer>,
        sink: Arc<dyn UpdateSink>,
        push_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            sink,
            main_loop: RwLock::new(None),
            push_timeout,
        }
    }

    /// Record the runtime that serves live connections.
    pub fn attach_main_loop(&self, handle: Handle) {
        *self.main_loop.write() = Some(handle);
    }

    pub fn detach_main_loop(&self) {
        *self.main_loop.write() = None;
    }

    pub fn has_main_loop(&self) -> bool {
        self.main_loop.read().is_some()
    }

    pub fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    pub fn sink(&self) -> &Arc<dyn UpdateSink> {
        &self.sink
    }

    /// Render and push whatever is dirty in the context's session.
    ///
    /// No-op without a session id, without a live connection, or with
    /// nothing dirty. Safe to call concurrently: the dirty set is drained
    /// atomically, so racing calls split the work instead of repeating it.
    pub fn push_dirty(&self, ctx: &SessionContext) {
        let Some(session_id) = ctx.session_id() else {
            return;
        };
        if !self.sink.is_connected(session_id) {
            debug!(session = %session_id.short(), "session not connected, skipping push");
            return;
        }

        let updates = self.renderer.render_dirty(&ctx.without_component());
        if updates.is_empty() {
            return;
        }
        self.push(session_id, updates);
    }

    /// Push already-rendered updates. Failures are logged, never returned.
    pub fn push(&self, session_id: &SessionId, updates: IndexMap<ComponentId, String>) {
        if updates.is_empty() || !self.sink.is_connected(session_id) {
            return;
        }
        let count = updates.len();
        match self.deliver(RenderedBatch::new(session_id.clone(), updates)) {
            Ok(()) => debug!(session = %session_id.short(), count, "pushed updates"),
            Err(err) => {
                warn!(session = %session_id.short(), error = %err, "failed to push updates")
            }
        }
    }

    /// Deliver one batch, reporting what went wrong.
    pub fn deliver(&self, batch: RenderedBatch) -> Result<(), DeliveryError> {
        let session = batch.session_id.clone();
        let main_loop = self.main_loop.read().clone();
        let push = self.sink.push_updates(batch);

        if let Ok(current) = Handle::try_current() {
            let handle = main_loop.unwrap_or(current);
            handle.spawn(async move {
                if let Err(err) = push.await {
                    warn!(session = %session.short(), error = %err, "failed to push updates");
                }
            });
            return Ok(());
        }

        match main_loop {
            Some(handle) => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                handle.spawn(async move {
                    let _ = tx.send(push.await);
                });
                match rx.recv_timeout(self.push_timeout) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => Err(DeliveryError::Timeout {
                        session,
                        timeout: self.push_timeout,
                    }),
                    Err(RecvTimeoutError::Disconnected) => Err(DeliveryError::LoopClosed(session)),
                }
            }
            None => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(DeliveryError::FallbackRuntime)?;
                runtime.block_on(push)
            }
        }
    }
}

impl fmt::Debug for DirtyPushBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirtyPushBridge")
            .field("has_main_loop", &self.has_main_loop())
            .field("push_timeout", &self.push_timeout)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
