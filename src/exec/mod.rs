// src/exec/mod.rs

//! Execution layer.
//!
//! - [`worker`] defines the `Runnable` capability and the `WorkerRegistry`
//!   that resolves worker references from job specs.
//! - [`shell`] is the built-in worker that runs an OS process.
//! - [`lifecycle`] drives individual attempts: launch, poll with timeout,
//!   retry bookkeeping and termination.
//! - [`node_log`] appends controller messages to per-node log files.

pub mod lifecycle;
pub mod node_log;
pub mod shell;
pub mod worker;

pub use lifecycle::{Launch, Lifecycle};
pub use shell::ShellWorker;
pub use worker::{LaunchError, Runnable, WorkerContext, WorkerFuture, WorkerRegistry};
