//! Trellis Core
//!
//! This crate provides the server-side state core of the Trellis UI
//! framework. It implements:
//!
//! - Session-scoped reactive cells with read-dependency tracking
//! - Derived expressions evaluated on demand against a session
//! - Background tasks with cooperative cancellation
//! - A bridge that pushes re-rendered components from worker threads to a
//!   session's live connection
//!
//! Markup generation and the wire transport are not part of this crate.
//! They plug in through [`bridge::UpdateSink`] and component builders.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `session`: per-session stores, the TTL-evicted registry, component ids
//! - `reactive`: cells, expressions, subscriptions, dependency tracking
//! - `task`: worker pools, cancellation, the background task state machine
//! - `bridge`: dirty rendering and delivery onto the connection loop
//! - `runtime`: the service object tying the above together
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{ReactiveCell, Runtime, RuntimeConfig, Value};
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let alice = runtime.session_context("alice");
//! let bob = runtime.session_context("bob");
//!
//! let counter = ReactiveCell::new("counter", 0);
//! counter.set(&alice, 5);
//!
//! assert_eq!(counter.get(&alice), Value::Int(5));
//! assert_eq!(counter.get(&bob), Value::Int(0));
//!
//! let big = counter.greater_than(3);
//! assert_eq!(big.evaluate(&alice)?, Value::Bool(true));
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod reactive;
pub mod runtime;
pub mod session;
pub mod task;
pub mod value;

pub use bridge::{BuilderRenderer, DirtyPushBridge, DirtyRenderer, RenderedBatch, UpdateSink};
pub use config::RuntimeConfig;
pub use error::{ConfigError, DeliveryError, ExprError, PoolError, TaskError};
pub use reactive::{DerivedExpression, ReactiveCell, SessionContext, Subscription};
pub use runtime::Runtime;
pub use session::{ComponentId, SessionId, SessionRegistry, SessionStore};
pub use task::{
    BackgroundTask, CancellationToken, ExecutorKind, TaskContext, TaskOptions, TaskState,
};
pub use value::Value;
