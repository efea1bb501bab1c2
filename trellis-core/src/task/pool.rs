//! Worker Pools
//!
//! Background work runs on fixed-size pools of named OS threads fed by a
//! crossbeam channel. There is at most one pool per [`ExecutorKind`], owned
//! by an [`ExecutorRegistry`] and shared by every task of a runtime.
//!
//! # Lifecycle
//!
//! Pools are created lazily the first time a task asks for their kind,
//! under the registry's single lock so two racing tasks never create two
//! pools. A pool found shut down is replaced on the next request. The first
//! request decides a pool's size; later `max_workers` values are ignored
//! until the pool is recreated.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{panic_message, PoolError};

/// Which pool a task runs on.
///
/// Both kinds run closures on threads of this process. `Process` is kept as
/// an independently sized pool so CPU-heavy work can be isolated from the
/// default pool's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Thread,
    Process,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::Thread => "thread",
            ExecutorKind::Process => "process",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads draining one job queue.
pub struct WorkerPool {
    kind: ExecutorKind,
    size: usize,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `<prefix>-<kind>-<n>`.
    pub fn new(kind: ExecutorKind, size: usize, prefix: &str) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{prefix}-{kind}-{index}"))
                .spawn(move || run_worker(kind, rx))?;
            workers.push(handle);
        }

        Ok(Self {
            kind,
            size,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. Fails only after [`shutdown`](Self::shutdown).
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let tx = sender.as_ref().ok_or(PoolError::ShutDown(self.kind))?;
        tx.send(Box::new(job))
            .map_err(|_| PoolError::ShutDown(self.kind))
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting jobs. Queued jobs still run; workers exit once the
    /// queue is empty.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            debug!(kind = %self.kind, "worker pool shut down");
        }
    }

    /// Shut down and wait for every worker to exit.
    pub fn join(&self) {
        self.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run_worker(kind: ExecutorKind, rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                kind = %kind,
                error = %panic_message(payload.as_ref()),
                "job panicked on worker thread"
            );
        }
    }
}

/// One lazily created pool per executor kind.
#[derive(Debug)]
pub struct ExecutorRegistry {
    thread_prefix: String,
    pools: Mutex<HashMap<ExecutorKind, Arc<WorkerPool>>>,
}

impl ExecutorRegistry {
    pub fn new(thread_prefix: impl Into<String>) -> Self {
        Self {
            thread_prefix: thread_prefix.into(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Shared pool for `kind`, created with `max_workers` threads if absent
    /// or shut down.
    pub fn pool(
        &self,
        kind: ExecutorKind,
        max_workers: usize,
    ) -> Result<Arc<WorkerPool>, PoolError> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&kind) {
            if !pool.is_shutdown() {
                return Ok(Arc::clone(pool));
            }
        }

        let pool = Arc::new(WorkerPool::new(kind, max_workers, &self.thread_prefix)?);
        debug!(kind = %kind, workers = pool.size(), "created worker pool");
        pools.insert(kind, Arc::clone(&pool));
        Ok(pool)
    }

    /// Pool for `kind` if one exists, without creating it.
    pub fn existing(&self, kind: ExecutorKind) -> Option<Arc<WorkerPool>> {
        self.pools.lock().get(&kind).cloned()
    }

    /// Shut down every pool. Later requests create fresh ones.
    pub fn shutdown(&self) {
        for pool in self.pools.lock().values() {
            pool.shutdown();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
