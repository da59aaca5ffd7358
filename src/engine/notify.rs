// src/engine/notify.rs

//! End-of-run notification.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dag::Register;
use crate::errors::Result;
use crate::types::{NodeStatus, RunOutcome};

/// Summary handed to a [`Notifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub job: String,
    pub outcome: RunOutcome,
    pub result: i32,
    pub failed: Vec<String>,
    pub aborted: Vec<String>,
    pub defaulted: usize,
    pub completed: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub log_dir: PathBuf,
}

impl RunReport {
    pub fn new(
        config: &AppConfig,
        register: &Register,
        result: i32,
        start: DateTime<Utc>,
    ) -> Self {
        let names = |status: NodeStatus| -> Vec<String> {
            register
                .ids_with(status)
                .iter()
                .filter_map(|id| register.get(*id))
                .map(|n| n.name.clone())
                .collect()
        };
        Self {
            job: config.app_name.clone(),
            outcome: RunOutcome::from_result(result),
            result,
            failed: names(NodeStatus::Failed),
            aborted: names(NodeStatus::Aborted),
            defaulted: register.count(NodeStatus::Defaulted),
            completed: register.count(NodeStatus::Completed),
            start,
            end: Utc::now(),
            log_dir: config.log_dir.clone(),
        }
    }

    pub fn subject(&self) -> String {
        format!("{} - {}", self.job, self.outcome.label())
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "Job: {}\nStatus: {}\nStarted: {}\nFinished: {}\nCompleted nodes: {}\nLog directory: {}\n",
            self.job,
            self.outcome.label(),
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.completed,
            self.log_dir.display()
        );
        if !self.failed.is_empty() {
            body.push_str(&format!("Failed nodes: {}\n", self.failed.join(", ")));
        }
        if !self.aborted.is_empty() {
            body.push_str(&format!("Aborted nodes: {}\n", self.aborted.join(", ")));
        }
        if self.defaulted > 0 {
            body.push_str(&format!("Defaulted nodes: {}\n", self.defaulted));
        }
        body
    }
}

/// Delivers the end-of-run report.
pub trait Notifier: Send {
    fn notify(&mut self, report: &RunReport, attachments: &[PathBuf]) -> Result<()>;
}

/// Writes the report to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, report: &RunReport, attachments: &[PathBuf]) -> Result<()> {
        match report.outcome {
            RunOutcome::Success => info!(subject = %report.subject(), "{}", report.body()),
            _ => warn!(
                subject = %report.subject(),
                attachments = ?attachments,
                "{}",
                report.body()
            ),
        }
        Ok(())
    }
}

/// Whether the config asks for a notification of `outcome`. An abort counts
/// as a failure.
pub fn should_notify(config: &AppConfig, outcome: RunOutcome) -> bool {
    match outcome {
        RunOutcome::Success => config.launch.notify_on_success,
        RunOutcome::Failure | RunOutcome::Aborted => config.launch.notify_on_fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_suppressed_with_failures() {
        let mut cfg = AppConfig::for_job("j", "/tmp/j");
        cfg.launch.notify_on_fail = false;
        assert!(!should_notify(&cfg, RunOutcome::Aborted));
        assert!(!should_notify(&cfg, RunOutcome::Failure));
        assert!(should_notify(&cfg, RunOutcome::Success));
    }
}
