// src/dag/mod.rs

//! Job graph data model.
//!
//! - [`node`] holds the node definition and its runtime fields.
//! - [`register`] owns all nodes and the partition into status sets.
//! - [`state_manager`] applies graph-wide transitions (cascade, revive,
//!   restart reset, selection filters).
//! - [`validate`] checks the graph for cycles.

pub mod node;
pub mod register;
pub mod state_manager;
pub mod validate;

pub use node::{DepRef, Node, NodeSpec};
pub use register::Register;
pub use state_manager::{StateManager, launch_candidates};
pub use validate::topological_order;
