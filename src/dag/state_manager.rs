// src/dag/state_manager.rs

//! Graph-wide status changes: failure cascade, revive, restart reset and the
//! pre-run selection filters.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info};

use crate::dag::Register;
use crate::types::{NodeId, NodeStatus};

/// Applies multi-node transitions to a borrowed [`Register`].
pub struct StateManager<'a> {
    register: &'a mut Register,
}

impl<'a> StateManager<'a> {
    pub fn new(register: &'a mut Register) -> Self {
        Self { register }
    }

    /// Mark every not-yet-run descendant of `failed` as DEFAULTED.
    ///
    /// Only PENDING descendants change; completed work, explicitly excluded
    /// (NORUN) nodes and nodes already in a terminal state keep their status.
    /// Returns the newly defaulted ids.
    pub fn mark_descendants_defaulted(&mut self, failed: NodeId) -> Vec<NodeId> {
        let mut newly_defaulted = Vec::new();

        for id in self.register.descendants(failed) {
            if self.register.status_of(id) == Some(NodeStatus::Pending)
                && self.register.transition(id, NodeStatus::Defaulted).is_ok()
            {
                newly_defaulted.push(id);
            }
        }

        if !newly_defaulted.is_empty() {
            debug!(
                failed,
                defaulted = ?newly_defaulted,
                "marked descendants DEFAULTED due to upstream failure"
            );
        }

        newly_defaulted
    }

    /// Move FAILED and DEFAULTED nodes back to PENDING with attempts reset.
    pub fn revive_failed(&mut self) -> Vec<NodeId> {
        self.revive_statuses(&[NodeStatus::Failed, NodeStatus::Defaulted])
    }

    /// Prepare a register restored from a checkpoint for another run.
    ///
    /// Nodes that were RUNNING when the checkpoint was written never finished
    /// and go back to PENDING. FAILED, DEFAULTED and ABORTED nodes are only
    /// revived when `revive` is set.
    pub fn prepare_restart(&mut self, revive: bool) -> Vec<NodeId> {
        let interrupted: Vec<NodeId> = self
            .register
            .ids_with(NodeStatus::Running)
            .iter()
            .copied()
            .collect();
        for id in &interrupted {
            let _ = self.register.transition(*id, NodeStatus::Pending);
        }

        let mut requeued = interrupted;
        if revive {
            requeued.extend(self.revive_statuses(&[
                NodeStatus::Failed,
                NodeStatus::Defaulted,
                NodeStatus::Aborted,
            ]));
        }

        info!(requeued = requeued.len(), revive, "prepared restored graph for restart");
        requeued
    }

    fn revive_statuses(&mut self, statuses: &[NodeStatus]) -> Vec<NodeId> {
        let ids: Vec<NodeId> = statuses
            .iter()
            .flat_map(|s| self.register.ids_with(*s).iter().copied())
            .collect();

        for id in &ids {
            if let Some(node) = self.register.get_mut(*id) {
                node.revive();
            }
            let _ = self.register.transition(*id, NodeStatus::Pending);
        }

        if !ids.is_empty() {
            info!(revived = ?ids, "revived nodes back to PENDING");
        }
        ids
    }

    /// Execute only `keep`; every other PENDING node becomes NORUN.
    pub fn exec_only(&mut self, keep: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let others: Vec<NodeId> = self
            .register
            .ids_with(NodeStatus::Pending)
            .iter()
            .filter(|id| !keep.contains(id))
            .copied()
            .collect();
        self.set_norun(&others)
    }

    /// Exclude `ids` from the run.
    pub fn exec_disable(&mut self, ids: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let ids: Vec<NodeId> = ids.iter().copied().collect();
        self.set_norun(&ids)
    }

    /// Execute `roots` and all of their descendants only.
    pub fn exec_from(&mut self, roots: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut keep = roots.clone();
        for id in roots {
            keep.extend(self.register.descendants(*id));
        }
        self.exec_only(&keep)
    }

    /// Execute `targets` and all of their ancestors only.
    pub fn exec_to(&mut self, targets: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut keep = targets.clone();
        for id in targets {
            keep.extend(self.register.ancestors(*id));
        }
        self.exec_only(&keep)
    }

    /// PENDING -> NORUN. Nodes in any other status are left alone.
    fn set_norun(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        let mut changed = Vec::new();
        for id in ids {
            if self.register.status_of(*id) == Some(NodeStatus::Pending)
                && self.register.transition(*id, NodeStatus::NoRun).is_ok()
            {
                changed.push(*id);
            }
        }
        if !changed.is_empty() {
            debug!(norun = ?changed, "excluded nodes from this run");
        }
        changed
    }
}

/// PENDING nodes whose parents are all satisfied and whose retry wait, if
/// any, has elapsed, in id order.
pub fn launch_candidates(register: &Register, now: Instant) -> Vec<NodeId> {
    register
        .ids_with(NodeStatus::Pending)
        .iter()
        .copied()
        .filter(|id| register.dependencies_satisfied(*id))
        .filter(|id| register.get(*id).is_some_and(|n| n.is_runnable(now)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::node::{DepRef, NodeSpec};
    use std::path::Path;

    // 1 -> 2 -> 3, 1 -> 4, 5 (independent)
    fn graph() -> Register {
        let mk = |id, name: &str, deps: &[NodeId]| {
            let mut s = NodeSpec::new(id, name, "noop");
            s.dependencies = deps.iter().map(|d| DepRef::Id(*d)).collect();
            s
        };
        Register::from_specs(
            vec![
                mk(1, "a", &[-1]),
                mk(2, "b", &[1]),
                mk(3, "c", &[2]),
                mk(4, "d", &[1]),
                mk(5, "e", &[-1]),
            ],
            Path::new("."),
        )
        .unwrap()
    }

    #[test]
    fn cascade_defaults_descendants_only() {
        let mut reg = graph();
        reg.transition(1, NodeStatus::Running).unwrap();
        reg.transition(1, NodeStatus::Failed).unwrap();

        let defaulted = StateManager::new(&mut reg).mark_descendants_defaulted(1);
        assert_eq!(defaulted, vec![2, 3, 4]);
        assert_eq!(reg.status_of(5), Some(NodeStatus::Pending));
        reg.check_invariant().unwrap();
    }

    #[test]
    fn revive_resets_attempts() {
        let mut reg = graph();
        reg.get_mut(1).unwrap().attempts = 3;
        reg.transition(1, NodeStatus::Failed).unwrap();
        reg.transition(2, NodeStatus::Defaulted).unwrap();

        let revived = StateManager::new(&mut reg).revive_failed();
        assert_eq!(revived.len(), 2);
        assert_eq!(reg.get(1).unwrap().attempts(), 0);
        assert_eq!(reg.count(NodeStatus::Pending), 5);
    }

    #[test]
    fn restart_requeues_running_and_optionally_failed() {
        let mut reg = graph();
        reg.transition(1, NodeStatus::Completed).unwrap();
        reg.transition(2, NodeStatus::Running).unwrap();
        reg.transition(4, NodeStatus::Aborted).unwrap();

        StateManager::new(&mut reg).prepare_restart(false);
        assert_eq!(reg.status_of(2), Some(NodeStatus::Pending));
        assert_eq!(reg.status_of(4), Some(NodeStatus::Aborted));

        StateManager::new(&mut reg).prepare_restart(true);
        assert_eq!(reg.status_of(4), Some(NodeStatus::Pending));
        assert_eq!(reg.status_of(1), Some(NodeStatus::Completed));
    }

    #[test]
    fn filters_mark_norun() {
        let mut reg = graph();
        StateManager::new(&mut reg).exec_from(&BTreeSet::from([2]));
        let norun: Vec<_> = reg.ids_with(NodeStatus::NoRun).iter().copied().collect();
        assert_eq!(norun, vec![1, 4, 5]);

        let mut reg = graph();
        StateManager::new(&mut reg).exec_to(&BTreeSet::from([3]));
        let pending: Vec<_> = reg.ids_with(NodeStatus::Pending).iter().copied().collect();
        assert_eq!(pending, vec![1, 2, 3]);

        let mut reg = graph();
        StateManager::new(&mut reg).exec_disable(&BTreeSet::from([5]));
        assert_eq!(reg.status_of(5), Some(NodeStatus::NoRun));
    }

    #[test]
    fn norun_parent_satisfies_gate() {
        let mut reg = graph();
        StateManager::new(&mut reg).exec_disable(&BTreeSet::from([1]));
        let ready = launch_candidates(&reg, Instant::now());
        assert_eq!(ready, vec![2, 4, 5]);
    }
}
