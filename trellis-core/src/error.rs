//! Error Types
//!
//! Each concern in the crate reports its own failure enum. None of them are
//! surfaced through the fire-and-forget entry points (`BackgroundTask::start`,
//! `DirtyPushBridge::push`); they end up in task state or in the log.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;
use crate::task::ExecutorKind;

/// A type-erased error that can be shared between the worker that produced
/// it, the task status, and the `on_error` callback.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Faults raised while evaluating a derived expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unsupported operand types for {op}: '{lhs}' and '{rhs}'")]
    UnsupportedOperands {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("bad operand type for unary {op}: '{operand}'")]
    UnsupportedOperand {
        op: &'static str,
        operand: &'static str,
    },

    /// Sequence repetition needs exactly one integer operand.
    #[error("cannot repeat '{lhs}' by '{rhs}': exactly one operand must be an int")]
    Repetition {
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    Overflow(&'static str),
}

/// Outcome of a background work function that did not return a value.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Cooperative cancellation observed through `check_cancelled()`.
    #[error("background task cancelled by user")]
    Cancelled,

    /// Any fault returned by the work function.
    #[error("{0}")]
    Failed(SharedError),

    /// The work function panicked.
    #[error("work function panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wrap an arbitrary error (or message) as a work fault.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::Failed(Arc::from(error.into()))
    }

    /// Whether this is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ExprError> for TaskError {
    fn from(error: ExprError) -> Self {
        Self::Failed(Arc::new(error))
    }
}

/// Worker pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("{0} worker pool has been shut down")]
    ShutDown(ExecutorKind),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures while shipping rendered output to a live connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("push to session {session} timed out after {timeout:?}")]
    Timeout { session: SessionId, timeout: Duration },

    #[error("connection loop dropped the push for session {0}")]
    LoopClosed(SessionId),

    #[error("failed to build fallback runtime: {0}")]
    FallbackRuntime(#[source] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Invalid runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
