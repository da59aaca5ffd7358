// src/engine/mod.rs

//! Orchestration engine for dagrun.
//!
//! This module ties together:
//! - the scheduler tick ([`core`]): signals, polling, launching, progress,
//!   interactive requests and periodic checkpoints
//! - the run loop ([`runtime`]): fixed-rate ticks, Ctrl-C, hooks and the
//!   post-run steps
//! - post-run collaborators: [`notify`] and [`archive`]
//! - optional lifecycle callbacks ([`hooks`])

pub mod archive;
pub mod core;
pub mod hooks;
pub mod notify;
pub mod runtime;

pub use archive::{archive_logs, cleanup_logs};
pub use core::{Engine, TickOutcome};
pub use hooks::{EngineHooks, Hook, HookPoint};
pub use notify::{LogNotifier, Notifier, RunReport, should_notify};
