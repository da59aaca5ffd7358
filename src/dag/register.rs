// src/dag/register.rs

//! The node register: owns every node plus the partition of nodes into
//! status sets.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::{debug, trace};

use crate::dag::node::{DepRef, Node, NodeSpec};
use crate::dag::validate::ensure_acyclic;
use crate::errors::{DagrunError, Result};
use crate::types::{NodeId, NodeStatus, ROOT_NODE_ID};

/// Owns all nodes of a job graph.
///
/// Invariant: every node id is a member of exactly one status set, and that
/// set matches the node's own `status` field. All status changes go through
/// [`Register::transition`], which keeps both in sync.
#[derive(Debug, Clone, Default)]
pub struct Register {
    nodes: BTreeMap<NodeId, Node>,
    names: HashMap<String, NodeId>,
    sets: BTreeMap<NodeStatus, BTreeSet<NodeId>>,
}

impl Register {
    /// Build a register from parsed specs, resolving dependencies and
    /// validating the graph.
    ///
    /// Relative log file paths are resolved against `log_dir`; nodes without
    /// one log to `<log_dir>/<name>.log`.
    pub fn from_specs(specs: Vec<NodeSpec>, log_dir: &Path) -> Result<Self> {
        let mut register = Register::empty();

        for spec in &specs {
            register.insert(spec, log_dir)?;
        }

        for spec in &specs {
            for dep in &spec.dependencies {
                let parent = match dep {
                    DepRef::Id(id) if *id == ROOT_NODE_ID => continue,
                    DepRef::Id(id) => register.nodes.get(id).map(|n| n.id()),
                    DepRef::Name(name) => register.names.get(name).copied(),
                };

                let parent = parent.ok_or_else(|| {
                    DagrunError::Graph(format!(
                        "node '{}' depends on unknown node {:?}",
                        spec.name, dep
                    ))
                })?;

                if parent == spec.id {
                    return Err(DagrunError::Graph(format!(
                        "node '{}' cannot depend on itself",
                        spec.name
                    )));
                }

                register.link(parent, spec.id);
            }
        }

        ensure_acyclic(&register)?;
        register.check_invariant()?;

        debug!(nodes = register.len(), "built node register");
        Ok(register)
    }

    fn empty() -> Self {
        let sets = NodeStatus::ALL
            .into_iter()
            .map(|s| (s, BTreeSet::new()))
            .collect();
        Self {
            nodes: BTreeMap::new(),
            names: HashMap::new(),
            sets,
        }
    }

    fn insert(&mut self, spec: &NodeSpec, log_dir: &Path) -> Result<()> {
        if spec.id <= ROOT_NODE_ID {
            return Err(DagrunError::Graph(format!(
                "node '{}' has id {}; ids must be >= 0 ({} is the reserved root)",
                spec.name, spec.id, ROOT_NODE_ID
            )));
        }
        if self.nodes.contains_key(&spec.id) {
            return Err(DagrunError::Format(format!(
                "duplicate node id {}",
                spec.id
            )));
        }
        if self.names.contains_key(&spec.name) {
            return Err(DagrunError::Format(format!(
                "duplicate node name '{}'",
                spec.name
            )));
        }
        if spec.max_attempts < 1 {
            return Err(DagrunError::Format(format!(
                "node '{}' must allow at least one attempt",
                spec.name
            )));
        }

        let logfile = match &spec.logfile {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => log_dir.join(p),
            None => log_dir.join(format!("{}.log", spec.name)),
        };

        let node = Node::from_spec(spec, logfile);
        self.names.insert(node.name.clone(), node.id());
        if let Some(set) = self.sets.get_mut(&node.status) {
            set.insert(node.id());
        }
        self.nodes.insert(node.id(), node);
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parents.insert(parent);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Node> {
        self.names.get(name).and_then(|id| self.nodes.get(id))
    }

    /// Resolve a CLI-style reference: a numeric id or a node name.
    pub fn resolve(&self, reference: &str) -> Result<NodeId> {
        if let Ok(id) = reference.trim().parse::<NodeId>() {
            if self.nodes.contains_key(&id) {
                return Ok(id);
            }
        }
        self.find_by_name(reference.trim())
            .map(|n| n.id())
            .ok_or_else(|| DagrunError::Lookup(format!("no node with id or name '{reference}'")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn status_of(&self, id: NodeId) -> Option<NodeStatus> {
        self.nodes.get(&id).map(|n| n.status)
    }

    /// Members of one status set, in id order.
    pub fn ids_with(&self, status: NodeStatus) -> &BTreeSet<NodeId> {
        // Every status key is inserted by `empty()`.
        &self.sets[&status]
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.ids_with(status).len()
    }

    /// Whether the engine still has PENDING or RUNNING work.
    pub fn has_active(&self) -> bool {
        self.count(NodeStatus::Pending) + self.count(NodeStatus::Running) > 0
    }

    /// Move a node to another status set.
    pub fn transition(&mut self, id: NodeId, to: NodeStatus) -> Result<NodeStatus> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| DagrunError::Lookup(format!("no node with id {id}")))?;
        let from = node.status;
        if from == to {
            return Ok(from);
        }

        node.status = to;
        if let Some(set) = self.sets.get_mut(&from) {
            set.remove(&id);
        }
        if let Some(set) = self.sets.get_mut(&to) {
            set.insert(id);
        }

        trace!(id, node = %node.name, %from, %to, "status transition");
        Ok(from)
    }

    /// Parents of `id` that are real nodes (the implicit root is never stored).
    pub fn parents_of(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.nodes
            .get(&id)
            .into_iter()
            .flat_map(|n| n.parents.iter())
            .filter_map(|p| self.nodes.get(p))
    }

    /// True when every direct parent is COMPLETED or NORUN.
    pub fn dependencies_satisfied(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        node.parents.iter().all(|p| {
            *p < 0
                || self
                    .nodes
                    .get(p)
                    .is_some_and(|parent| parent.status.satisfies_dependency())
        })
    }

    /// All strict descendants of `id`.
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.closure(id, |n| &n.children)
    }

    /// All strict ancestors of `id`.
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.closure(id, |n| &n.parents)
    }

    fn closure<F>(&self, id: NodeId, next: F) -> BTreeSet<NodeId>
    where
        F: Fn(&Node) -> &BTreeSet<NodeId>,
    {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&id)
            .map(|n| next(n).iter().copied().collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(next(node).iter().copied());
            }
        }

        seen
    }

    /// Verify the status partition and edge symmetry.
    pub fn check_invariant(&self) -> Result<()> {
        let mut seen = 0usize;
        for (status, ids) in &self.sets {
            for id in ids {
                let node = self.nodes.get(id).ok_or_else(|| {
                    DagrunError::Runtime(format!("status set {status} holds unknown node {id}"))
                })?;
                if node.status != *status {
                    return Err(DagrunError::Runtime(format!(
                        "node {id} is in set {status} but has status {}",
                        node.status
                    )));
                }
            }
            seen += ids.len();
        }
        if seen != self.nodes.len() {
            return Err(DagrunError::Runtime(format!(
                "status sets hold {seen} entries for {} nodes",
                self.nodes.len()
            )));
        }

        for node in self.nodes.values() {
            for child in &node.children {
                let symmetric = self
                    .nodes
                    .get(child)
                    .is_some_and(|c| c.parents.contains(&node.id()));
                if !symmetric {
                    return Err(DagrunError::Runtime(format!(
                        "edge {} -> {child} is not mirrored",
                        node.id()
                    )));
                }
            }
        }

        Ok(())
    }

    /// `name(id)` for every node in one status set, in id order.
    pub fn labels(&self, status: NodeStatus) -> Vec<String> {
        self.ids_with(status)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| format!("{}({})", n.name, n.id()))
            .collect()
    }

    /// Count of nodes per status, in `NodeStatus::ALL` order.
    pub fn summary(&self) -> Vec<(NodeStatus, usize)> {
        NodeStatus::ALL
            .into_iter()
            .map(|s| (s, self.count(s)))
            .collect()
    }
}
