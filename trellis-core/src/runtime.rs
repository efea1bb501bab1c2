//! Trellis Runtime
//!
//! The [`Runtime`] owns every process-wide service of the core: the session
//! registry, the executor pools, and the dirty push bridge. It is built
//! once at server start, shared as an `Arc`, and torn down with
//! [`Runtime::shutdown`].
//!
//! # Example
//!
//! ```rust,ignore
//! let runtime = Runtime::with_sink(RuntimeConfig::default(), sink)?;
//! runtime.attach_main_loop(tokio::runtime::Handle::current());
//!
//! let ctx = runtime.session_context(session_id);
//! let progress = ReactiveCell::new("progress", 0);
//!
//! let train = runtime
//!     .background(move |task| {
//!         for epoch in 0..100 {
//!             task.check_cancelled()?;
//!             progress.set(task.session(), epoch);
//!         }
//!         Ok(Value::Null)
//!     })
//!     .singleton(true)
//!     .build();
//! train.start(&ctx);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::bridge::{BuilderRenderer, DirtyPushBridge, DirtyRenderer, DisconnectedSink, UpdateSink};
use crate::config::RuntimeConfig;
use crate::error::{panic_message, ConfigError, TaskError};
use crate::reactive::SessionContext;
use crate::session::{ComponentId, SessionId, SessionRegistry};
use crate::task::{ExecutorRegistry, TaskBuilder, TaskContext};
use crate::value::Value;

/// Shared services of one server instance.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    sessions: Arc<SessionRegistry>,
    executors: ExecutorRegistry,
    bridge: Arc<DirtyPushBridge>,
}

impl Runtime {
    /// Runtime with no connection layer. Nothing is ever pushed.
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_sink(config, Arc::new(DisconnectedSink))
    }

    /// Runtime pushing through `sink` with the default [`BuilderRenderer`].
    pub fn with_sink(
        config: RuntimeConfig,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::with_parts(config, sink, Arc::new(BuilderRenderer))
    }

    pub fn with_parts(
        config: RuntimeConfig,
        sink: Arc<dyn UpdateSink>,
        renderer: Arc<dyn DirtyRenderer>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let bridge = DirtyPushBridge::new(renderer, sink, config.push_timeout());
        Ok(Arc::new(Self {
            sessions: Arc::new(SessionRegistry::new(&config)),
            executors: ExecutorRegistry::new(config.worker_thread_prefix.clone()),
            bridge: Arc::new(bridge),
            config,
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn bridge(&self) -> &Arc<DirtyPushBridge> {
        &self.bridge
    }

    /// Context for `session_id`; `None` addresses the static scope.
    pub fn context(&self, session_id: Option<SessionId>) -> SessionContext {
        SessionContext::new(Arc::clone(&self.sessions), session_id)
    }

    pub fn static_context(&self) -> SessionContext {
        self.context(None)
    }

    pub fn session_context(&self, session_id: impl Into<SessionId>) -> SessionContext {
        self.context(Some(session_id.into()))
    }

    /// Start configuring a background task around `work`.
    pub fn background<F>(self: &Arc<Self>, work: F) -> TaskBuilder
    where
        F: Fn(&TaskContext) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        TaskBuilder::new(Arc::clone(self), Arc::new(work))
    }

    /// Route a client event to a component's action handler.
    ///
    /// The session's handlers win over static ones. Returns whether a
    /// handler was found; a panicking handler is logged and still counts.
    pub fn dispatch_action(
        &self,
        ctx: &SessionContext,
        component: &ComponentId,
        payload: &Value,
    ) -> bool {
        let action = ctx
            .store()
            .action(component)
            .or_else(|| self.sessions.static_store().action(component));
        let Some(action) = action else {
            debug!(component = %component, "no action registered");
            return false;
        };

        let ctx = ctx.without_component();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(&ctx, payload)));
        if let Err(panic_payload) = outcome {
            error!(
                component = %component,
                error = %panic_message(panic_payload.as_ref()),
                "action handler panicked"
            );
        }
        true
    }

    pub fn attach_main_loop(&self, handle: Handle) {
        self.bridge.attach_main_loop(handle);
    }

    pub fn detach_main_loop(&self) {
        self.bridge.detach_main_loop();
    }

    /// Shut down worker pools and forget the main loop. Runs in progress
    /// finish on their own; a later `start()` brings fresh pools up.
    pub fn shutdown(&self) {
        self.executors.shutdown();
        self.bridge.detach_main_loop();
        debug!("runtime shut down");
    }
}
