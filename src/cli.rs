// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::AppConfig;
use crate::errors::{DagrunError, Result};

/// Command-line arguments for `dagrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagrun",
    version,
    about = "Run a batch job graph with retries, checkpoints and restart.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `dagrun.toml` in the current working directory.
    #[arg(long, short = 'c', value_name = "PATH", default_value = "dagrun.toml")]
    pub config: PathBuf,

    /// Job specification (`.lst` line format or `.json`).
    #[arg(long, short = 'j', value_name = "PATH")]
    pub jobspec: Option<PathBuf>,

    /// Resume from the last checkpoint when one exists; otherwise start
    /// from `--jobspec`.
    #[arg(long, short = 'r')]
    pub restart: bool,

    /// With `--restart`: also rerun FAILED, DEFAULTED and ABORTED nodes.
    /// Alone: ask the running instance to revive its failed nodes.
    #[arg(long)]
    pub revive: bool,

    /// Ask the running instance of this job to abort, then exit.
    #[arg(long)]
    pub abort: bool,

    /// Maximum number of concurrently running nodes (0 = unlimited).
    #[arg(long, value_name = "N")]
    pub max_procs: Option<usize>,

    /// Scheduler ticks per second (0 = no sleep between ticks).
    #[arg(long, value_name = "N")]
    pub tickrate: Option<u32>,

    /// Minimum seconds between two launches.
    #[arg(long, value_name = "SECS")]
    pub time_between_tasks: Option<f64>,

    /// Run only these nodes (ids or names, comma separated).
    #[arg(long, value_name = "NODES", value_delimiter = ',')]
    pub exec_only: Vec<String>,

    /// Exclude these nodes from the run.
    #[arg(long, value_name = "NODES", value_delimiter = ',')]
    pub exec_disable: Vec<String>,

    /// Run these nodes and everything downstream of them.
    #[arg(long, value_name = "NODES", value_delimiter = ',')]
    pub exec_from: Vec<String>,

    /// Run these nodes and everything upstream of them.
    #[arg(long, value_name = "NODES", value_delimiter = ',')]
    pub exec_to: Vec<String>,

    /// Print the nodes in dependency order and the context, then exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Prompt on stdin for context values workers ask for but nobody set.
    #[arg(long)]
    pub interactive: bool,

    /// Suppress the per-tick progress summary.
    #[arg(long)]
    pub silent: bool,

    /// Leave node logs in place after the run.
    #[arg(long)]
    pub no_archive: bool,

    /// Skip the duplicate-instance check.
    #[arg(long)]
    pub allow_duplicate_jobs: bool,

    /// Seed a context value (repeatable).
    #[arg(long = "cvar", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub cvars: Vec<(String, String)>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Read or write the context of a running job (for process workers).
    Ctx {
        /// Socket path; defaults to `DAGRUN_CONTEXT_SOCKET`.
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        #[command(subcommand)]
        op: CtxOp,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum CtxOp {
    /// Print the value of KEY (strings raw, everything else as JSON).
    Get { key: String },
    /// Set KEY to VALUE (parsed as JSON, falling back to a string).
    Set { key: String, value: String },
    /// Remove KEY.
    Remove { key: String },
    /// List all keys.
    Keys,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliArgs {
    /// Apply flags that override `[launch]` values.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        let launch = &mut config.launch;
        if let Some(n) = self.max_procs {
            launch.max_procs = n;
        }
        if let Some(n) = self.tickrate {
            launch.tickrate = n;
        }
        if let Some(secs) = self.time_between_tasks {
            launch.time_between_tasks = secs;
        }
        if self.interactive {
            launch.interactive = true;
        }
        if self.silent {
            launch.silent = true;
        }
        if self.no_archive {
            launch.archive_logs = false;
        }
        if self.allow_duplicate_jobs {
            launch.allow_duplicate_jobs = true;
        }
    }

    pub fn has_filters(&self) -> bool {
        !(self.exec_only.is_empty()
            && self.exec_disable.is_empty()
            && self.exec_from.is_empty()
            && self.exec_to.is_empty())
    }
}

fn parse_key_value(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(DagrunError::Config(format!(
            "expected KEY=VALUE, got '{s}'"
        ))),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filters_and_cvars() {
        let args = CliArgs::try_parse_from([
            "dagrun",
            "--jobspec",
            "job.lst",
            "--exec-from",
            "load,2",
            "--cvar",
            "run_date=2024-01-01",
            "--cvar",
            "mode=full",
            "--max-procs",
            "4",
        ])
        .unwrap();
        assert_eq!(args.exec_from, vec!["load", "2"]);
        assert_eq!(
            args.cvars,
            vec![
                ("run_date".to_string(), "2024-01-01".to_string()),
                ("mode".to_string(), "full".to_string())
            ]
        );
        assert!(args.has_filters());

        let mut cfg = AppConfig::for_job("j", "/tmp/j");
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.launch.max_procs, 4);
    }

    #[test]
    fn rejects_cvar_without_equals() {
        assert!(CliArgs::try_parse_from(["dagrun", "--cvar", "novalue"]).is_err());
    }

    #[test]
    fn ctx_subcommand() {
        let args = CliArgs::try_parse_from(["dagrun", "ctx", "set", "rows", "12"]).unwrap();
        match args.command {
            Some(Command::Ctx {
                op: CtxOp::Set { key, value },
                ..
            }) => {
                assert_eq!(key, "rows");
                assert_eq!(value, "12");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
