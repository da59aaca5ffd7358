// src/engine/core.rs

//! The scheduler tick.
//!
//! [`Engine::tick`] performs one pass of the control loop:
//!
//! 1. clear PULSE (proves to a probing invocation that we are alive);
//! 2. on ABORT, terminate everything and stop;
//! 3. on REVIVE, return FAILED and DEFAULTED nodes to PENDING;
//! 4. poll RUNNING nodes and reclassify the finished ones;
//! 5. launch eligible PENDING nodes within the concurrency cap and the
//!    launch throttle;
//! 6. log a progress summary;
//! 7. answer interactive context requests;
//! 8. write a periodic checkpoint.
//!
//! Sleeping until the next tick is the run loop's job (`runtime.rs`).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{Level, debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::context::{ContextHandle, Prompter, StdinPrompter};
use crate::dag::{Register, StateManager, launch_candidates};
use crate::engine::hooks::EngineHooks;
use crate::engine::notify::{LogNotifier, Notifier};
use crate::errors::Result;
use crate::exec::{Launch, Lifecycle, WorkerRegistry};
use crate::signal::SignalChannel;
use crate::types::{NodeId, NodeStatus, Signal};

/// What the run loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// PENDING or RUNNING work remains.
    Continue,
    /// Nothing is PENDING or RUNNING any more.
    Finished,
    /// An ABORT signal stopped the run.
    Aborted,
}

pub struct Engine {
    pub(crate) config: AppConfig,
    pub(crate) register: Register,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) signals: SignalChannel,
    pub(crate) checkpoints: Option<CheckpointStore>,
    pub(crate) context: ContextHandle,
    pub(crate) prompter: Box<dyn Prompter>,
    pub(crate) notifier: Box<dyn Notifier>,
    pub(crate) hooks: EngineHooks,
    pub(crate) restarted: bool,

    last_launch: Option<Instant>,
    last_save: Instant,
    pub(crate) started: Instant,
    pub(crate) started_at: DateTime<Utc>,
}

impl Engine {
    /// Engine for `register` with signals in `config.temp_dir` and, when
    /// `config.launch.checkpointing` is set, checkpoints next to them.
    pub fn new(
        config: AppConfig,
        register: Register,
        context: ContextHandle,
        workers: WorkerRegistry,
    ) -> Self {
        let lifecycle = Lifecycle::new(config.app_name.clone(), workers, context.clone(), None);
        let signals = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());
        let checkpoints = config
            .launch
            .checkpointing
            .then(|| CheckpointStore::for_config(&config));

        Self {
            config,
            register,
            lifecycle,
            signals,
            checkpoints,
            context,
            prompter: Box::new(StdinPrompter),
            notifier: Box::new(LogNotifier),
            hooks: EngineHooks::default(),
            restarted: false,
            last_launch: None,
            last_save: Instant::now(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn with_hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn with_prompter(mut self, prompter: impl Prompter + 'static) -> Self {
        self.prompter = Box::new(prompter);
        self
    }

    /// Mark the run as resumed from a checkpoint (selects `on_restart`).
    pub fn restarted(mut self, restarted: bool) -> Self {
        self.restarted = restarted;
        self
    }

    /// Socket path exported to process workers.
    pub fn with_context_socket(mut self, socket: Option<PathBuf>) -> Self {
        self.lifecycle.set_context_socket(socket);
        self
    }

    pub fn register(&self) -> &Register {
        &self.register
    }

    pub fn into_register(self) -> Register {
        self.register
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn signals(&self) -> &SignalChannel {
        &self.signals
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.checkpoints.as_ref()
    }

    /// Run one tick. See the module docs for the order of steps.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.signals.consume(Signal::Pulse)?;

        if self.signals.consume(Signal::Abort)? {
            warn!(job = %self.config.app_name, "ABORT signal received; terminating all running nodes");
            self.abort("ABORT signal received").await?;
            return Ok(TickOutcome::Aborted);
        }

        if self.signals.consume(Signal::Revive)? {
            let revived = StateManager::new(&mut self.register).revive_failed();
            info!(revived = revived.len(), "REVIVE signal received");
        }

        self.poll_running().await;
        self.launch_pending();

        if !self.config.launch.silent {
            self.log_progress();
        }

        self.answer_requests().await?;

        if self.checkpoints.is_some() && self.last_save.elapsed() >= self.config.save_interval() {
            self.save_checkpoints().await?;
        }

        self.register.check_invariant()?;

        if self.register.has_active() {
            Ok(TickOutcome::Continue)
        } else {
            Ok(TickOutcome::Finished)
        }
    }

    async fn poll_running(&mut self) {
        let running: Vec<NodeId> = self
            .register
            .ids_with(NodeStatus::Running)
            .iter()
            .copied()
            .collect();

        for id in running {
            let Some(node) = self.register.get_mut(id) else {
                continue;
            };
            let Some(code) = self.lifecycle.poll(node, false).await else {
                continue;
            };
            self.apply_exit(id, code);
        }
    }

    /// Reclassify a node whose attempt just ended.
    fn apply_exit(&mut self, id: NodeId, code: i32) {
        let name = self
            .register
            .get(id)
            .map(|n| n.name.clone())
            .unwrap_or_default();

        let to = match code {
            0 => NodeStatus::Completed,
            c if c < 0 => NodeStatus::Pending,
            _ => NodeStatus::Failed,
        };
        if let Err(e) = self.register.transition(id, to) {
            warn!(id, error = %e, "failed to record node exit");
            return;
        }

        match to {
            NodeStatus::Completed => info!(node = %name, id, "node completed"),
            NodeStatus::Pending => debug!(node = %name, id, "node queued for retry"),
            _ => {
                warn!(node = %name, id, exit_code = code, "node failed");
                StateManager::new(&mut self.register).mark_descendants_defaulted(id);
            }
        }
    }

    fn launch_pending(&mut self) {
        let now = Instant::now();
        let max_procs = self.config.max_procs();
        let spacing = self.config.time_between_tasks();

        for id in launch_candidates(&self.register, now) {
            if max_procs.is_some_and(|max| self.register.count(NodeStatus::Running) >= max) {
                break;
            }
            if !spacing.is_zero()
                && self
                    .last_launch
                    .is_some_and(|last| Instant::now() < last + spacing)
            {
                break;
            }

            let Some(node) = self.register.get_mut(id) else {
                continue;
            };
            match self.lifecycle.execute(node, now) {
                Launch::Deferred => continue,
                Launch::Started | Launch::Failed(_) => {
                    if let Err(e) = self.register.transition(id, NodeStatus::Running) {
                        warn!(id, error = %e, "failed to mark node running");
                    }
                    self.last_launch = Some(Instant::now());
                }
            }
        }
    }

    fn log_progress(&self) {
        info!(
            pending = self.register.count(NodeStatus::Pending),
            running = self.register.count(NodeStatus::Running),
            completed = self.register.count(NodeStatus::Completed),
            failed = self.register.count(NodeStatus::Failed),
            defaulted = self.register.count(NodeStatus::Defaulted),
            elapsed_secs = format!("{:.2}", self.started.elapsed().as_secs_f64()),
            "progress"
        );
        if tracing::enabled!(Level::DEBUG) {
            debug!(
                pending = ?self.register.labels(NodeStatus::Pending),
                running = ?self.register.labels(NodeStatus::Running),
                failed = ?self.register.labels(NodeStatus::Failed),
                "node sets"
            );
        }
    }

    async fn answer_requests(&mut self) -> Result<()> {
        for key in self.context.take_requests().await? {
            let value = self.prompter.prompt(&key).await?;
            debug!(%key, "interactive value provided");
            self.context.set(key, Value::String(value)).await?;
        }
        Ok(())
    }

    /// Terminate every RUNNING node, mark it ABORTED, default its
    /// descendants and write both checkpoints.
    pub async fn abort(&mut self, reason: &str) -> Result<()> {
        let running: Vec<NodeId> = self
            .register
            .ids_with(NodeStatus::Running)
            .iter()
            .copied()
            .collect();

        for id in running {
            if let Some(node) = self.register.get_mut(id) {
                self.lifecycle.terminate(node, reason).await;
            }
            self.register.transition(id, NodeStatus::Aborted)?;
            StateManager::new(&mut self.register).mark_descendants_defaulted(id);
        }

        self.save_checkpoints().await
    }

    pub(crate) async fn save_checkpoints(&mut self) -> Result<()> {
        if let Some(store) = &self.checkpoints {
            let snapshot = self.context.snapshot().await?;
            store.save_graph(&self.config.app_name, &self.register)?;
            store.save_context(&self.config, snapshot)?;
            self.last_save = Instant::now();
        }
        Ok(())
    }

    /// Tick length, `None` for back-to-back ticks.
    pub fn tick_period(&self) -> Option<Duration> {
        self.config.tick_period()
    }
}
