// src/engine/runtime.rs

//! The run loop around [`Engine::tick`] and everything that happens once
//! the loop ends.

use std::path::PathBuf;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::engine::archive::{archive_logs, cleanup_logs};
use crate::engine::core::{Engine, TickOutcome};
use crate::engine::hooks::HookPoint;
use crate::engine::notify::{RunReport, should_notify};
use crate::errors::Result;
use crate::types::{NodeStatus, RunOutcome};

impl Engine {
    /// Drive ticks until nothing is PENDING or RUNNING, or until the run is
    /// aborted by an ABORT signal or Ctrl-C.
    ///
    /// Returns `0` on success, the number of FAILED nodes otherwise, or `-1`
    /// when aborted.
    pub async fn run(&mut self) -> Result<i32> {
        self.register.check_invariant()?;
        if self.restarted {
            self.hooks.fire(HookPoint::Restart, &self.register);
        } else {
            self.hooks.fire(HookPoint::Create, &self.register);
        }
        self.hooks.fire(HookPoint::Start, &self.register);

        info!(
            job = %self.config.app_name,
            nodes = self.register.len(),
            pending = self.register.count(NodeStatus::Pending),
            restarted = self.restarted,
            "starting run"
        );

        let aborted = self.tick_loop().await?;

        // Release workers still blocked on interactive reads.
        self.context.set_interactive(false).await?;

        let result = if aborted {
            -1
        } else {
            let failed = self.register.count(NodeStatus::Failed);
            if failed == 0 {
                self.hooks.fire(HookPoint::Success, &self.register);
            } else {
                self.hooks.fire(HookPoint::Fail, &self.register);
            }
            i32::try_from(failed).unwrap_or(i32::MAX)
        };
        self.hooks.fire(HookPoint::Destroy, &self.register);

        if !aborted {
            self.save_checkpoints().await?;
        }
        self.log_final_state(result);
        self.after_run(result)?;

        Ok(result)
    }

    /// Returns `true` when the loop ended by abort.
    async fn tick_loop(&mut self) -> Result<bool> {
        let mut interval = self.tick_period().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        if let Some(interval) = interval.as_mut() {
            // The first tick of an interval completes immediately.
            interval.tick().await;
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        // One interval wait per iteration, raced against Ctrl-C.
        loop {
            match self.tick().await? {
                TickOutcome::Continue => {}
                TickOutcome::Finished => return Ok(false),
                TickOutcome::Aborted => return Ok(true),
            }

            tokio::select! {
                _ = wait_for_tick(interval.as_mut()) => {}
                res = &mut ctrl_c => {
                    if let Err(e) = res {
                        error!(error = %e, "failed to listen for Ctrl-C");
                    }
                    warn!("keyboard interrupt received; cancelling execution");
                    self.abort("keyboard interrupt received").await?;
                    return Ok(true);
                }
            }
        }
    }

    fn log_final_state(&self, result: i32) {
        let elapsed = format!("{:.2}", self.started.elapsed().as_secs_f64());
        match RunOutcome::from_result(result) {
            RunOutcome::Success => info!(elapsed_secs = %elapsed, "final status: SUCCESS"),
            RunOutcome::Aborted => {
                for node in self.nodes_in(NodeStatus::Aborted) {
                    warn!(id = node.0, node = %node.1, logfile = %node.2.display(), "aborted node");
                }
                warn!(elapsed_secs = %elapsed, "final status: ABORTED");
            }
            RunOutcome::Failure => {
                for node in self.nodes_in(NodeStatus::Failed) {
                    warn!(id = node.0, node = %node.1, logfile = %node.2.display(), "failed node");
                }
                warn!(elapsed_secs = %elapsed, failed = result, "final status: FAILURE");
            }
        }
    }

    fn nodes_in(&self, status: NodeStatus) -> Vec<(i64, String, PathBuf)> {
        self.register
            .ids_with(status)
            .iter()
            .filter_map(|id| self.register.get(*id))
            .map(|n| (n.id(), n.name.clone(), n.logfile.clone()))
            .collect()
    }

    /// Notification, log archival, retention and, on success, checkpoint
    /// removal.
    fn after_run(&mut self, result: i32) -> Result<()> {
        let outcome = RunOutcome::from_result(result);

        if should_notify(&self.config, outcome) {
            let report = RunReport::new(&self.config, &self.register, result, self.started_at);
            let attachments: Vec<PathBuf> = [NodeStatus::Failed, NodeStatus::Aborted]
                .into_iter()
                .flat_map(|s| self.nodes_in(s))
                .map(|(_, _, log)| log)
                .filter(|log| log.is_file())
                .collect();
            if let Err(e) = self.notifier.notify(&report, &attachments) {
                warn!(error = %e, "failed to send notification");
            }
        }

        if self.config.launch.archive_logs {
            let checkpoint = self.checkpoints.as_ref().map(|c| c.graph_path().to_path_buf());
            archive_logs(
                &self.config.log_dir,
                &self.config.app_name,
                &self.register,
                outcome,
                checkpoint.as_deref(),
            )?;
        }

        cleanup_logs(
            &self.config.log_root_dir,
            self.config.log_retention,
            &self.config.log_dir,
        )?;

        if outcome == RunOutcome::Success {
            if let Some(store) = &self.checkpoints {
                store.delete()?;
                info!("run succeeded; removed checkpoints");
            }
        }

        Ok(())
    }
}

async fn wait_for_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}
