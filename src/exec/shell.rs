// src/exec/shell.rs

//! Built-in `shell` worker: runs the node's arguments as an OS process.

use std::fs::{self, OpenOptions};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::context::SOCKET_ENV;
use crate::exec::worker::{LaunchError, Runnable, WorkerContext, WorkerFuture};
use crate::types::exit_code;

/// Runs `argv` as a child process.
///
/// - one argument: passed to `sh -c` (or `cmd /C` on Windows);
/// - several arguments: the first is the program, the rest its arguments.
///
/// stdout and stderr are appended to the node's log file. The child is
/// killed when the attempt is terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellWorker;

impl ShellWorker {
    pub const NAME: &'static str = "shell";
}

impl Runnable for ShellWorker {
    fn run(&self, ctx: WorkerContext) -> WorkerFuture<'_> {
        Box::pin(run_process(ctx))
    }
}

async fn run_process(ctx: WorkerContext) -> Result<i32> {
    let mut cmd = build_command(&ctx.argv)?;

    if let Some(parent) = ctx.logfile.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&ctx.logfile)
        .with_context(|| format!("opening log file {}", ctx.logfile.display()))?;
    let log_err = log.try_clone()?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .env("DAGRUN_JOB", &ctx.job)
        .env("DAGRUN_NODE_ID", ctx.node_id.to_string())
        .env("DAGRUN_NODE_NAME", &ctx.node_name)
        .env("DAGRUN_ATTEMPT", ctx.attempt.to_string())
        .env("DAGRUN_LOGFILE", &ctx.logfile)
        .kill_on_drop(true);
    if let Some(socket) = &ctx.context_socket {
        cmd.env(SOCKET_ENV, socket);
    }

    info!(node = %ctx.node_name, argv = ?ctx.argv, "starting worker process");

    let mut child = cmd.spawn().map_err(|e| {
        LaunchError(format!(
            "spawning process for node '{}' failed: {e}",
            ctx.node_name
        ))
    })?;

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of node '{}'", ctx.node_name))?;

    // Killed by a signal: no exit code to report.
    let code = status.code().unwrap_or(exit_code::WORKER_ERROR);
    debug!(node = %ctx.node_name, exit_code = code, "worker process exited");
    Ok(code)
}

fn build_command(argv: &[String]) -> std::result::Result<Command, LaunchError> {
    match argv {
        [] => Err(LaunchError(
            "shell worker needs at least one argument".to_string(),
        )),
        [script] => {
            let cmd = if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(script);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(script);
                c
            };
            Ok(cmd)
        }
        [program, args @ ..] => {
            let mut c = Command::new(program);
            c.args(args);
            Ok(c)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::{ContextHandle, ContextMap};

    fn ctx(dir: &std::path::Path, argv: &[&str]) -> WorkerContext {
        WorkerContext {
            job: "job".into(),
            node_id: 7,
            node_name: "seven".into(),
            attempt: 1,
            argv: argv.iter().map(|s| s.to_string()).collect(),
            logfile: dir.join("seven.log"),
            context: ContextHandle::spawn(ContextMap::new(), false),
            context_socket: None,
        }
    }

    #[tokio::test]
    async fn exit_code_and_output_reach_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), &["echo \"$DAGRUN_NODE_NAME:$DAGRUN_NODE_ID\"; exit 3"]);
        let log = ctx.logfile.clone();

        let code = ShellWorker.run(ctx).await.unwrap();
        assert_eq!(code, 3);
        assert_eq!(std::fs::read_to_string(log).unwrap().trim(), "seven:7");
    }

    #[tokio::test]
    async fn argv_form_runs_program_directly() {
        let dir = tempfile::tempdir().unwrap();
        let code = ShellWorker.run(ctx(dir.path(), &["true", "ignored"])).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn empty_argv_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellWorker.run(ctx(dir.path(), &[])).await.unwrap_err();
        assert!(err.is::<LaunchError>());
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellWorker
            .run(ctx(dir.path(), &["/nonexistent/dagrun-no-such-program", "x"]))
            .await
            .unwrap_err();
        assert!(err.is::<LaunchError>());
        assert!(err.to_string().contains("seven"));
    }
}
