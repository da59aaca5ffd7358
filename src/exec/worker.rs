// src/exec/worker.rs

//! Worker capability and the registry that maps worker references in a job
//! spec to implementations.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::context::ContextHandle;
use crate::exec::shell::ShellWorker;
use crate::types::NodeId;

/// What a worker gets to see for one attempt.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub job: String,
    pub node_id: NodeId,
    pub node_name: String,
    pub attempt: u32,
    pub argv: Vec<String>,
    pub logfile: PathBuf,
    pub context: ContextHandle,
    /// Socket serving `context` to child processes, when one is running.
    pub context_socket: Option<PathBuf>,
}

pub type WorkerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<i32>> + Send + 'a>>;

/// The worker could not start its work at all (bad arguments, program not
/// found). Recorded as a launch failure rather than a worker error.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LaunchError(pub String);

/// A unit of work that can be attached to a node.
///
/// `Ok(0)` is success, `Ok(1..=899)` an application failure. An `Err`
/// wrapping [`LaunchError`] is a launch failure; any other value, error or
/// panic is recorded as a worker error.
pub trait Runnable: Send + Sync {
    fn run(&self, ctx: WorkerContext) -> WorkerFuture<'_>;
}

impl<F, Fut> Runnable for F
where
    F: Fn(WorkerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<i32>> + Send + 'static,
{
    fn run(&self, ctx: WorkerContext) -> WorkerFuture<'_> {
        Box::pin(self(ctx))
    }
}

/// Worker references known to this process.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Runnable>>,
}

impl WorkerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `shell` worker.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ShellWorker::NAME, ShellWorker);
        registry
    }

    /// Add or replace a worker.
    pub fn register(&mut self, name: impl Into<String>, worker: impl Runnable + 'static) {
        self.workers.insert(name.into(), Arc::new(worker));
    }

    pub fn register_arc(&mut self, name: impl Into<String>, worker: Arc<dyn Runnable>) {
        self.workers.insert(name.into(), worker);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Runnable>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.names())
            .finish()
    }
}
