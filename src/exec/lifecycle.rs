// src/exec/lifecycle.rs

//! Per-node attempt lifecycle: launch, poll, terminate.
//!
//! Each attempt runs as its own tokio task. The controller never awaits a
//! live attempt except in blocking polls and terminations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::ContextHandle;
use crate::dag::Node;
use crate::exec::node_log;
use crate::exec::worker::{LaunchError, Runnable, WorkerContext, WorkerRegistry};
use crate::types::{NodeId, RETRY_PENDING, exit_code};

/// Result of [`Lifecycle::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// The node is still inside its retry wait; nothing happened.
    Deferred,
    /// An attempt is running.
    Started,
    /// The attempt could not be started. It is still tracked and the next
    /// poll reports `code` through the usual retry policy.
    Failed(i32),
}

enum Attempt {
    Live(JoinHandle<i32>),
    Finished(i32),
}

struct WorkerHandle {
    attempt: Attempt,
    started: Instant,
}

/// Owns the in-flight attempts of one run.
pub struct Lifecycle {
    job: String,
    registry: WorkerRegistry,
    context: ContextHandle,
    context_socket: Option<PathBuf>,
    handles: HashMap<NodeId, WorkerHandle>,
}

impl Lifecycle {
    pub fn new(
        job: impl Into<String>,
        registry: WorkerRegistry,
        context: ContextHandle,
        context_socket: Option<PathBuf>,
    ) -> Self {
        Self {
            job: job.into(),
            registry,
            context,
            context_socket,
            handles: HashMap::new(),
        }
    }

    pub fn set_context_socket(&mut self, socket: Option<PathBuf>) {
        self.context_socket = socket;
    }

    /// Number of attempts currently tracked.
    pub fn in_flight(&self) -> usize {
        self.handles.len()
    }

    pub fn is_tracking(&self, id: NodeId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Start the next attempt of `node`, unless its retry wait is still
    /// running.
    pub fn execute(&mut self, node: &mut Node, now: Instant) -> Launch {
        if !node.is_runnable(now) {
            return Launch::Deferred;
        }

        node.attempts += 1;
        node.wait_until = None;
        node.end_time = None;
        if node.start_time.is_none() {
            node.start_time = Some(Utc::now());
        }

        node_log::system(
            &node.logfile,
            &format!("attempt {} of {} started", node.attempts, node.max_attempts),
        );

        let (attempt, launch) = match self.registry.get(&node.worker) {
            Some(worker) => (Attempt::Live(self.spawn(worker, node)), Launch::Started),
            None => {
                let msg = format!(
                    "unknown worker '{}' (registered: {})",
                    node.worker,
                    self.registry.names().join(", ")
                );
                error!(node = %node.name, id = node.id(), "{msg}");
                node_log::error(&node.logfile, &msg);
                (
                    Attempt::Finished(exit_code::LAUNCH_FAILED),
                    Launch::Failed(exit_code::LAUNCH_FAILED),
                )
            }
        };

        info!(
            node = %node.name,
            id = node.id(),
            attempt = node.attempts,
            max_attempts = node.max_attempts,
            "launched node"
        );

        self.handles.insert(
            node.id(),
            WorkerHandle {
                attempt,
                started: now,
            },
        );
        launch
    }

    fn spawn(&self, worker: Arc<dyn Runnable>, node: &Node) -> JoinHandle<i32> {
        let ctx = WorkerContext {
            job: self.job.clone(),
            node_id: node.id(),
            node_name: node.name.clone(),
            attempt: node.attempts,
            argv: node.argv.clone(),
            logfile: node.logfile.clone(),
            context: self.context.clone(),
            context_socket: self.context_socket.clone(),
        };
        let logfile = node.logfile.clone();
        let name = node.name.clone();

        tokio::spawn(async move {
            match worker.run(ctx).await {
                Ok(code) if code == exit_code::SUCCESS || (1..=899).contains(&code) => code,
                Ok(code) => {
                    warn!(node = %name, exit_code = code, "worker returned a code outside 0..=899");
                    node_log::error(
                        &logfile,
                        &format!("worker returned reserved or negative exit code {code}"),
                    );
                    exit_code::WORKER_ERROR
                }
                Err(e) if e.is::<LaunchError>() => {
                    error!(node = %name, error = %e, "worker could not be launched");
                    node_log::error(&logfile, &format!("{e:#}"));
                    exit_code::LAUNCH_FAILED
                }
                Err(e) => {
                    error!(node = %name, error = %e, "worker failed");
                    node_log::error(&logfile, &format!("{e:#}"));
                    exit_code::WORKER_ERROR
                }
            }
        })
    }

    /// Check on the current attempt of `node`.
    ///
    /// Returns `None` while it is still running. Otherwise returns the exit
    /// code, or [`RETRY_PENDING`] when the attempt failed but the node has
    /// attempts left (its retry wait is set). With `blocking` the call waits
    /// for the attempt to finish, still honouring the timeout.
    pub async fn poll(&mut self, node: &mut Node, blocking: bool) -> Option<i32> {
        let Some(handle) = self.handles.get_mut(&node.id()) else {
            return Some(exit_code::NOT_LAUNCHED);
        };

        let joined = match &mut handle.attempt {
            Attempt::Finished(code) => Some(Ok(*code)),
            Attempt::Live(task) if task.is_finished() => Some(task.await),
            Attempt::Live(task) if blocking => match node.timeout {
                Some(limit) => {
                    let deadline = tokio::time::Instant::from_std(handle.started + limit);
                    tokio::time::timeout_at(deadline, task).await.ok()
                }
                None => Some(task.await),
            },
            Attempt::Live(_) => match node.timeout {
                Some(limit) if handle.started.elapsed() >= limit => None,
                _ => return None,
            },
        };

        let code = match joined {
            Some(Ok(code)) => code,
            Some(Err(e)) if e.is_panic() => {
                error!(node = %node.name, id = node.id(), "worker panicked");
                node_log::error(&node.logfile, "worker panicked");
                exit_code::WORKER_ERROR
            }
            Some(Err(e)) => {
                error!(node = %node.name, id = node.id(), error = %e, "worker task did not complete");
                exit_code::WORKER_ERROR
            }
            None => self.time_out(node).await,
        };

        self.handles.remove(&node.id());
        Some(self.settle(node, code))
    }

    async fn time_out(&mut self, node: &mut Node) -> i32 {
        let limit = node.timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
        warn!(node = %node.name, timeout_secs = limit, "node exceeded its timeout");
        self.kill(
            node,
            &format!("worker runtime exceeded the timeout of {limit} seconds"),
        )
        .await;
        exit_code::TIMED_OUT
    }

    /// Apply the retry policy to a finished attempt.
    fn settle(&self, node: &mut Node, code: i32) -> i32 {
        node.end_time = Some(Utc::now());

        if code > 0 && node.has_attempts_left() {
            node.wait_until = Some(Instant::now() + node.retry_wait_time);
            let msg = format!(
                "attempt {} of {} failed with exit code {code}; retrying in {:.1} seconds",
                node.attempts,
                node.max_attempts,
                node.retry_wait_time.as_secs_f64()
            );
            node_log::system(&node.logfile, &msg);
            info!(node = %node.name, id = node.id(), attempt = node.attempts, exit_code = code, "scheduling retry");
            return RETRY_PENDING;
        }

        debug!(node = %node.name, id = node.id(), exit_code = code, "attempt finished");
        code
    }

    /// Force-kill the current attempt of `node` and report
    /// [`exit_code::TERMINATED`]. No retry is scheduled.
    pub async fn terminate(&mut self, node: &mut Node, reason: &str) -> i32 {
        self.kill(node, reason).await;
        self.handles.remove(&node.id());
        node.end_time = Some(Utc::now());
        exit_code::TERMINATED
    }

    async fn kill(&mut self, node: &Node, reason: &str) {
        if let Some(handle) = self.handles.get_mut(&node.id()) {
            if let Attempt::Live(task) = &mut handle.attempt {
                if !task.is_finished() {
                    task.abort();
                    node_log::system(&node.logfile, reason);
                    info!(node = %node.name, id = node.id(), %reason, "terminated node");
                }
                // Wait for the task to drop its future, which kills any child.
                let _ = (&mut *task).await;
            }
        }
    }
}
