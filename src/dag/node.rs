// src/dag/node.rs

//! Node definition: static task description plus per-run runtime fields.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::types::{NodeId, NodeStatus};

/// Reference to a dependency as written in a job spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepRef {
    Id(NodeId),
    Name(String),
}

/// Everything needed to add a node to a [`crate::dag::Register`].
///
/// Produced by the job-spec parsers, the checkpoint loader and tests.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    pub dependencies: Vec<DepRef>,
    pub worker: String,
    pub argv: Vec<String>,
    pub logfile: Option<PathBuf>,
    pub max_attempts: u32,
    pub retry_wait_time: Duration,
    pub timeout: Option<Duration>,
    /// Initial status; fresh specs start `Pending`.
    pub status: NodeStatus,
}

impl NodeSpec {
    pub fn new(id: NodeId, name: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            dependencies: Vec::new(),
            worker: worker.into(),
            argv: Vec::new(),
            logfile: None,
            max_attempts: 1,
            retry_wait_time: Duration::ZERO,
            timeout: None,
            status: NodeStatus::Pending,
        }
    }
}

/// A unit of work in the job graph.
///
/// Edges are stored as ids; the owning register keeps parent and child
/// sets symmetric.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    pub name: String,
    pub worker: String,
    pub argv: Vec<String>,
    pub logfile: PathBuf,
    pub max_attempts: u32,
    pub retry_wait_time: Duration,
    pub timeout: Option<Duration>,

    pub(crate) parents: BTreeSet<NodeId>,
    pub(crate) children: BTreeSet<NodeId>,
    pub(crate) status: NodeStatus,

    pub(crate) attempts: u32,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    /// Earliest instant at which the next attempt may start.
    pub(crate) wait_until: Option<Instant>,
}

impl Node {
    pub(crate) fn from_spec(spec: &NodeSpec, logfile: PathBuf) -> Self {
        Self {
            id: spec.id,
            name: spec.name.clone(),
            worker: spec.worker.clone(),
            argv: spec.argv.clone(),
            logfile,
            max_attempts: spec.max_attempts,
            retry_wait_time: spec.retry_wait_time,
            timeout: spec.timeout,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            status: spec.status,
            attempts: 0,
            start_time: None,
            end_time: None,
            wait_until: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn parents(&self) -> &BTreeSet<NodeId> {
        &self.parents
    }

    pub fn children(&self) -> &BTreeSet<NodeId> {
        &self.children
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// False while a retry wait is still in effect.
    pub fn is_runnable(&self, now: Instant) -> bool {
        self.wait_until.is_none_or(|until| now >= until)
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Forget attempts and any pending retry wait.
    pub(crate) fn revive(&mut self) {
        self.attempts = 0;
        self.wait_until = None;
    }

    /// Wall-clock runtime formatted as `HH:MM:SS`.
    pub fn elapsed_display(&self) -> String {
        let Some(start) = self.start_time else {
            return "00:00:00".to_string();
        };
        let end = self.end_time.unwrap_or_else(Utc::now);
        let secs = (end - start).num_seconds().max(0);
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_until_gates_runnable() {
        let spec = NodeSpec::new(1, "a", "noop");
        let mut node = Node::from_spec(&spec, PathBuf::from("a.log"));
        let now = Instant::now();
        assert!(node.is_runnable(now));

        node.wait_until = Some(now + Duration::from_secs(5));
        assert!(!node.is_runnable(now));
        assert!(node.is_runnable(now + Duration::from_secs(5)));

        node.attempts = 3;
        node.revive();
        assert_eq!(node.attempts(), 0);
        assert!(node.is_runnable(now));
    }

    #[test]
    fn elapsed_is_zero_before_start() {
        let node = Node::from_spec(&NodeSpec::new(1, "a", "noop"), PathBuf::from("a.log"));
        assert_eq!(node.elapsed_display(), "00:00:00");
    }
}
