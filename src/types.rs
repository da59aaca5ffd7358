// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Node identifier as written in job specs and checkpoints.
pub type NodeId = i64;

/// Reserved id of the implicit root. A dependency on it is always satisfied.
pub const ROOT_NODE_ID: NodeId = -1;

/// Exit code reported when a node failed but still has attempts left.
///
/// The scheduler moves such a node back to PENDING instead of FAILED.
pub const RETRY_PENDING: i32 = -1;

/// Reserved controller-level exit codes.
///
/// Worker-defined failure codes must stay in `1..=899`; anything inside
/// [`RESERVED_EXIT_CODES`] is produced by the controller itself.
pub mod exit_code {
    use std::ops::RangeInclusive;

    pub const SUCCESS: i32 = 0;
    /// Polled a node that never had a worker attached.
    pub const NOT_LAUNCHED: i32 = 901;
    /// Setting up the worker failed (unknown worker, spawn error, ...).
    pub const LAUNCH_FAILED: i32 = 902;
    /// The worker returned an error or panicked.
    pub const WORKER_ERROR: i32 = 903;
    /// The worker was killed by an explicit terminate (abort, shutdown).
    pub const TERMINATED: i32 = 907;
    /// The worker exceeded its timeout and was killed.
    pub const TIMED_OUT: i32 = 908;

    pub const RESERVED_EXIT_CODES: RangeInclusive<i32> = 900..=999;

    pub fn is_reserved(code: i32) -> bool {
        RESERVED_EXIT_CODES.contains(&code)
    }
}

/// Status of a node. Every node of a register is in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeStatus {
    #[serde(rename = "P")]
    Pending,
    #[serde(rename = "R")]
    Running,
    #[serde(rename = "C")]
    Completed,
    #[serde(rename = "F")]
    Failed,
    #[serde(rename = "D")]
    Defaulted,
    #[serde(rename = "A")]
    Aborted,
    #[serde(rename = "N")]
    NoRun,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 7] = [
        NodeStatus::Pending,
        NodeStatus::Running,
        NodeStatus::Completed,
        NodeStatus::Failed,
        NodeStatus::Defaulted,
        NodeStatus::Aborted,
        NodeStatus::NoRun,
    ];

    pub fn code(self) -> char {
        match self {
            NodeStatus::Pending => 'P',
            NodeStatus::Running => 'R',
            NodeStatus::Completed => 'C',
            NodeStatus::Failed => 'F',
            NodeStatus::Defaulted => 'D',
            NodeStatus::Aborted => 'A',
            NodeStatus::NoRun => 'N',
        }
    }

    /// Whether a child may start once its parent is in this status.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::NoRun)
    }

    /// Statuses the engine still has work for.
    pub fn is_active(self) -> bool {
        matches!(self, NodeStatus::Pending | NodeStatus::Running)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Pending => "PENDING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Completed => "COMPLETED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Defaulted => "DEFAULTED",
            NodeStatus::Aborted => "ABORTED",
            NodeStatus::NoRun => "NORUN",
        };
        f.write_str(name)
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "P" | "PENDING" => Ok(NodeStatus::Pending),
            "R" | "RUNNING" => Ok(NodeStatus::Running),
            "C" | "COMPLETED" => Ok(NodeStatus::Completed),
            "F" | "FAILED" => Ok(NodeStatus::Failed),
            "D" | "DEFAULTED" => Ok(NodeStatus::Defaulted),
            "A" | "ABORTED" => Ok(NodeStatus::Aborted),
            "N" | "NORUN" => Ok(NodeStatus::NoRun),
            other => Err(format!("invalid node status: {other}")),
        }
    }
}

/// Cross-process control signals understood by a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    Abort,
    Pulse,
    Revive,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Abort, Signal::Pulse, Signal::Revive];

    /// Suffix of the marker file name.
    pub fn marker(self) -> &'static str {
        match self {
            Signal::Abort => "sig.abort",
            Signal::Pulse => "sig.pulse",
            Signal::Revive => "sig.revive",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Abort => "ABORT",
            Signal::Pulse => "PULSE",
            Signal::Revive => "REVIVE",
        })
    }
}

/// Final outcome of a run, used for notifications and log archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    Aborted,
}

impl RunOutcome {
    /// Classify an engine result (`0`, number of failed nodes, or `-1`).
    pub fn from_result(code: i32) -> Self {
        match code {
            0 => RunOutcome::Success,
            c if c < 0 => RunOutcome::Aborted,
            _ => RunOutcome::Failure,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::Failure => "FAILURE",
            RunOutcome::Aborted => "ABORT",
        }
    }
}
