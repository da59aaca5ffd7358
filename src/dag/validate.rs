// src/dag/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::Register;
use crate::errors::{DagrunError, Result};
use crate::types::NodeId;

/// Fail with [`DagrunError::Cycle`] if the register's edges are not acyclic.
///
/// Edge direction: parent -> child.
pub fn ensure_acyclic(register: &Register) -> Result<()> {
    topological_order(register).map(|_| ())
}

/// Node ids ordered so that every parent precedes its children.
pub fn topological_order(register: &Register) -> Result<Vec<NodeId>> {
    let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();

    for node in register.nodes() {
        graph.add_node(node.id());
    }

    for node in register.nodes() {
        for parent in node.parents() {
            graph.add_edge(*parent, node.id(), ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let id = cycle.node_id();
        let name = register
            .get(id)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        DagrunError::Cycle(format!(
            "cycle detected in job graph involving node {id} ('{name}')"
        ))
    })
}
