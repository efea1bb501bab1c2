//! Background Work
//!
//! Runs long work functions off the request path on shared worker pools,
//! with cooperative cancellation and periodic pushes of the changes the
//! work makes to its session.

mod background;
mod cancel;
mod flusher;
mod pool;

pub use background::{
    BackgroundTask, CompleteFn, ErrorFn, TaskBuilder, TaskContext, TaskId, TaskOptions, TaskState,
    WorkFn,
};
pub use cancel::CancellationToken;
pub use pool::{ExecutorKind, ExecutorRegistry, WorkerPool};
