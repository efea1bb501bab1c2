//! Background Tasks
//!
//! A [`BackgroundTask`] runs a work function on a shared worker pool
//! without blocking the caller, and keeps the originating session's live
//! connection up to date while it runs.
//!
//! # Lifecycle
//!
//! ```text
//! idle ──start()──▶ running ──┬──▶ completed
//!                             ├──▶ failed
//!                             └──▶ cancelled
//! ```
//!
//! A task may be started again from any state. Each `start()` begins a new
//! run with its own generation number and [`CancellationToken`]; a run only
//! ever writes the status of its own generation, so a slow earlier run that
//! finishes late cannot clobber the state of a newer one.
//!
//! # Inside a Run
//!
//! 1. A flusher thread pushes the session's dirty output every flush
//!    interval.
//! 2. The work function runs with a [`TaskContext`] carrying the captured
//!    session and the run's token.
//! 3. The outcome settles the state, followed by a final flush. Callbacks
//!    run afterwards and get a flush of their own.
//! 4. The flusher is stopped with a bounded wait.
//!
//! Cancellation is cooperative. [`BackgroundTask::cancel`] flips the token
//! and reports `cancelled` immediately, but the work function keeps running
//! until it polls [`TaskContext::check_cancelled`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::cancel::CancellationToken;
use super::flusher::Flusher;
use super::pool::ExecutorKind;
use crate::error::{panic_message, TaskError};
use crate::reactive::SessionContext;
use crate::runtime::Runtime;
use crate::value::Value;

/// Work function of a task.
pub type WorkFn = Arc<dyn Fn(&TaskContext) -> Result<Value, TaskError> + Send + Sync>;

/// Called after a run completes normally.
pub type CompleteFn = Arc<dyn Fn(&SessionContext) + Send + Sync>;

/// Called once with the fault of a failed run.
pub type ErrorFn = Arc<dyn Fn(&SessionContext, &TaskError) + Send + Sync>;

/// Observable state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Whether a run has settled into an outcome.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling options of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub executor: ExecutorKind,
    pub max_workers: usize,
    /// Ignore `start()` while a run is in progress.
    pub singleton: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::Thread,
            max_workers: 4,
            singleton: false,
        }
    }
}

/// Unique identifier for a task, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What a work function sees of its run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    session: SessionContext,
    token: CancellationToken,
}

impl TaskContext {
    /// Session the task was started from. Cell reads and writes made
    /// through it resolve against that session.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(TaskError::Cancelled)` once the run was cancelled.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        self.token.check()
    }
}

struct TaskStatus {
    state: TaskState,
    generation: u64,
    token: CancellationToken,
    result: Option<Value>,
    error: Option<TaskError>,
}

struct TaskShared {
    id: TaskId,
    runtime: Arc<Runtime>,
    work: WorkFn,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
    options: TaskOptions,
    status: Mutex<TaskStatus>,
}

/// Configures a [`BackgroundTask`]. Obtained from
/// [`Runtime::background`](crate::Runtime::background).
pub struct TaskBuilder {
    runtime: Arc<Runtime>,
    work: WorkFn,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
    options: TaskOptions,
}

impl TaskBuilder {
    pub(crate) fn new(runtime: Arc<Runtime>, work: WorkFn) -> Self {
        let options = TaskOptions {
            max_workers: runtime.config().default_max_workers,
            ..TaskOptions::default()
        };
        Self {
            runtime,
            work,
            on_complete: None,
            on_error: None,
            options,
        }
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionContext) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionContext, &TaskError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.options.singleton = singleton;
        self
    }

    pub fn executor(mut self, executor: ExecutorKind) -> Self {
        self.options.executor = executor;
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.options.max_workers = max_workers;
        self
    }

    pub fn options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> BackgroundTask {
        BackgroundTask {
            shared: Arc::new(TaskShared {
                id: TaskId::next(),
                runtime: self.runtime,
                work: self.work,
                on_complete: self.on_complete,
                on_error: self.on_error,
                options: self.options,
                status: Mutex::new(TaskStatus {
                    state: TaskState::Idle,
                    generation: 0,
                    token: CancellationToken::new(),
                    result: None,
                    error: None,
                }),
            }),
        }
    }
}

/// Handle to a restartable unit of background work.
///
/// Clones control the same task.
#[derive(Clone)]
pub struct BackgroundTask {
    shared: Arc<TaskShared>,
}

impl BackgroundTask {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn options(&self) -> &TaskOptions {
        &self.shared.options
    }

    /// Begin a new run for the session `ctx` addresses.
    ///
    /// Returns immediately. Faults never surface here: they end up in
    /// [`state`](Self::state) and [`error`](Self::error).
    pub fn start(&self, ctx: &SessionContext) {
        let shared = &self.shared;
        if ctx.session_id().is_none() {
            warn!(task = %shared.id, "no session context available, updates will not be pushed");
        }

        let (generation, token) = {
            let mut status = shared.status.lock();
            if shared.options.singleton && status.state == TaskState::Running {
                debug!(task = %shared.id, "singleton task already running, ignoring start");
                return;
            }
            status.generation += 1;
            status.token = CancellationToken::new();
            status.state = TaskState::Running;
            status.result = None;
            status.error = None;
            (status.generation, status.token.clone())
        };

        let run = Run {
            task: self.clone(),
            generation,
            ctx: TaskContext {
                session: ctx.without_component(),
                token,
            },
        };

        let options = &shared.options;
        let submitted = shared
            .runtime
            .executors()
            .pool(options.executor, options.max_workers)
            .and_then(|pool| pool.submit(move || run.execute()));

        if let Err(err) = submitted {
            error!(
                task = %shared.id,
                executor = %options.executor,
                error = %err,
                "failed to submit background task"
            );
            self.settle(generation, TaskState::Failed, None, Some(TaskError::failed(err)));
        }
    }

    /// Request cancellation of the current run.
    ///
    /// Only effective while running. The state reads `cancelled` at once,
    /// but the work function stops only when it next polls its token.
    pub fn cancel(&self) {
        let mut status = self.shared.status.lock();
        if status.state == TaskState::Running {
            status.token.cancel();
            status.state = TaskState::Cancelled;
            debug!(task = %self.shared.id, "task marked as cancelled");
        }
    }

    /// `Err(TaskError::Cancelled)` if the current run was cancelled.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        self.shared.status.lock().token.check()
    }

    pub fn state(&self) -> TaskState {
        self.shared.status.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Whether cancellation was requested for the current run.
    pub fn is_cancelled(&self) -> bool {
        self.shared.status.lock().token.is_cancelled()
    }

    /// Value returned by the last run, once it finished.
    pub fn result(&self) -> Option<Value> {
        self.shared.status.lock().result.clone()
    }

    /// Fault of the last failed run.
    pub fn error(&self) -> Option<TaskError> {
        self.shared.status.lock().error.clone()
    }

    /// Apply an outcome if `generation` is still the current run.
    fn settle(
        &self,
        generation: u64,
        state: TaskState,
        result: Option<Value>,
        error: Option<TaskError>,
    ) -> bool {
        let mut status = self.shared.status.lock();
        if status.generation != generation {
            debug!(
                task = %self.shared.id,
                generation,
                current = status.generation,
                "stale run finished"
            );
            return false;
        }
        status.state = state;
        status.result = result;
        status.error = error;
        true
    }
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.shared.status.lock();
        f.debug_struct("BackgroundTask")
            .field("id", &self.shared.id)
            .field("state", &status.state)
            .field("generation", &status.generation)
            .field("options", &self.shared.options)
            .finish()
    }
}

/// One execution attempt, moved onto a worker thread.
struct Run {
    task: BackgroundTask,
    generation: u64,
    ctx: TaskContext,
}

impl Run {
    fn execute(self) {
        let Run {
            task,
            generation,
            ctx,
        } = self;
        let shared = &task.shared;
        let runtime = &shared.runtime;
        let config = runtime.config();
        let session = ctx.session.clone();

        let flusher = {
            let bridge = Arc::clone(runtime.bridge());
            let session = session.clone();
            let name = format!("{}-flush-{}", config.worker_thread_prefix, shared.id.0);
            let tick = move || bridge.push_dirty(&session);
            match Flusher::spawn(name, config.flush_interval(), tick) {
                Ok(flusher) => Some(flusher),
                Err(err) => {
                    warn!(
                        task = %shared.id,
                        error = %err,
                        "failed to spawn flusher, progress will only be pushed at the end"
                    );
                    None
                }
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (shared.work)(&ctx)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        let flush = || runtime.bridge().push_dirty(&session);

        match outcome {
            Ok(value) if ctx.is_cancelled() => {
                task.settle(generation, TaskState::Cancelled, Some(value), None);
                debug!(task = %shared.id, "task cancelled during execution");
                flush();
            }
            Ok(value) => {
                task.settle(generation, TaskState::Completed, Some(value), None);
                debug!(task = %shared.id, "task completed");
                flush();
                if let Some(on_complete) = &shared.on_complete {
                    if run_callback(shared.id, "on_complete", || on_complete(&session)) {
                        flush();
                    }
                }
            }
            Err(TaskError::Cancelled) => {
                task.settle(generation, TaskState::Cancelled, None, None);
                debug!(task = %shared.id, "task cancelled via check_cancelled");
                flush();
            }
            Err(fault) => {
                task.settle(generation, TaskState::Failed, None, Some(fault.clone()));
                error!(task = %shared.id, error = %fault, "background task failed");
                if let Some(on_error) = &shared.on_error {
                    if run_callback(shared.id, "on_error", || on_error(&session, &fault)) {
                        flush();
                    }
                }
            }
        }

        if let Some(flusher) = flusher {
            if !flusher.stop(config.flusher_join_timeout()) {
                debug!(task = %shared.id, "flusher detached");
            }
        }
    }
}

/// Invoke a lifecycle callback, containing any panic. Returns whether it
/// finished normally.
fn run_callback<F: FnOnce()>(task: TaskId, name: &'static str, callback: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                task = %task,
                callback = name,
                error = %panic_message(payload.as_ref()),
                "task callback panicked"
            );
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::reactive::ReactiveCell;
    use crate::session::SessionId;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn runtime() -> Arc<Runtime> {
        let config = RuntimeConfig {
            flush_interval_ms: 10,
            ..RuntimeConfig::default()
        };
        Runtime::new(config).unwrap()
    }

    fn wait_for(task: &BackgroundTask, predicate: impl Fn(&BackgroundTask) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate(task) {
            assert!(Instant::now() < deadline, "timed out in state {}", task.state());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_finished(task: &BackgroundTask) {
        wait_for(task, |t| t.state().is_finished());
    }

    #[test]
    fn new_task_is_idle() {
        let runtime = runtime();
        let task = runtime.background(|_| Ok(Value::Null)).build();
        assert_eq!(task.state(), TaskState::Idle);
        assert!(task.result().is_none());
        assert_eq!(task.options().max_workers, 4);
    }

    #[test]
    fn completed_run_records_result_and_calls_on_complete() {
        let runtime = runtime();
        let ctx = runtime.context(Some(SessionId::from("s")));
        let done = ReactiveCell::new("done", false);
        let done_clone = done.clone();

        let task = runtime
            .background(|_| Ok(Value::Int(42)))
            .on_complete(move |session| done_clone.set(session, true))
            .build();
        task.start(&ctx);
        wait_finished(&task);

        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.result(), Some(Value::Int(42)));
        assert!(task.error().is_none());
        wait_for(&task, |_| done.get(&ctx) == Value::Bool(true));
    }

    #[test]
    fn work_writes_resolve_against_captured_session() {
        let runtime = runtime();
        let a = runtime.context(Some(SessionId::from("a")));
        let b = runtime.context(Some(SessionId::from("b")));
        let progress = ReactiveCell::new("progress", 0);
        let progress_clone = progress.clone();

        let task = runtime
            .background(move |task| {
                progress_clone.set(task.session(), 100);
                Ok(Value::Null)
            })
            .build();
        task.start(&a);
        wait_finished(&task);

        assert_eq!(progress.get(&a), Value::Int(100));
        assert_eq!(progress.get(&b), Value::Int(0));
    }

    #[test]
    fn failure_calls_on_error_once() {
        let runtime = runtime();
        let ctx = runtime.context(Some(SessionId::from("s")));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let task = runtime
            .background(|_| Err(TaskError::failed("boom")))
            .on_error(move |_, err| {
                assert_eq!(err.to_string(), "boom");
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        task.start(&ctx);
        wait_finished(&task);

        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.error().map(|e| e.to_string()), Some("boom".to_string()));
        wait_for(&task, |_| calls.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn panicking_work_fails_the_task() {
        let runtime = runtime();
        let ctx = runtime.context(Some(SessionId::from("s")));
        let task = runtime.background(|_| panic!("kaput")).build();

        task.start(&ctx);
        wait_finished(&task);

        assert_eq!(task.state(), TaskState::Failed);
        assert!(matches!(task.error(), Some(TaskError::Panicked(msg)) if msg == "kaput"));
    }

    #[test]
    fn panicking_on_error_is_contained() {
        let runtime = runtime();
        let ctx = runtime.context(Some(SessionId::from("s")));
        let task = runtime
            .background(|_| Err(TaskError::failed("boom")))
            .on_error(|_, _| panic!("secondary fault"))
            .build();

        task.start(&ctx);
        wait_finished(&task);
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn check_cancelled_stops_the_run() {
        let runtime = runtime();
        let ctx = runtime.context(Some(SessionId::from("s")));
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);

        let task = runtime
            .background(move |task| {
                let _ = started_tx.send(());
                loop {
                    task.check_cancelled()?;
                    std::thread::sleep(Duration::from_millis(2));
                }
            })
            .build();
        task.start(&ctx);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        task.cancel();

        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.is_cancelled());
        assert!(task.check_cancelled().is_err());
    }

    #[test]
    fn cancel_is_ignored_unless_running() {
        let runtime = runtime();
        let task = runtime.background(|_| Ok(Value::Null)).build();
        task.cancel();
        assert_eq!(task.state(), TaskState::Idle);
        assert!(!task.is_cancelled());
    }

    #[test]
    fn restart_resets_cancellation() {
        let runtime = runtime();
        let ctx = runtime.context(Some(SessionId::from("s")));
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();

        let task = runtime
            .background(move |_| {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(Value::Null)
            })
            .build();
        task.start(&ctx);
        task.cancel();
        assert!(task.is_cancelled());

        task.start(&ctx);
        assert_eq!(task.state(), TaskState::Running);
        assert!(!task.is_cancelled());

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        wait_for(&task, |t| t.state() == TaskState::Completed);
    }

    #[test]
    fn task_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskState::Cancelled).unwrap(), "\"cancelled\"");
        let options: TaskOptions = serde_json::from_str(r#"{"singleton": true}"#).unwrap();
        assert!(options.singleton);
        assert_eq!(options.executor, ExecutorKind::Thread);
    }
}
