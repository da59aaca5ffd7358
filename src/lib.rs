// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod jobspec;
pub mod logging;
pub mod signal;
pub mod types;

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::cli::{CliArgs, Command, CtxOp};
use crate::config::{AppConfig, load_and_validate, validate_launch};
use crate::context::{ContextHandle, ContextMap};
use crate::dag::{Register, StateManager, topological_order};
use crate::engine::Engine;
use crate::errors::{DagrunError, Result};
use crate::exec::WorkerRegistry;
use crate::jobspec::load_jobspec;
use crate::signal::SignalChannel;
use crate::types::{NodeId, Signal};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - signal submission (`--abort`, `--revive`) and duplicate detection
/// - graph construction from a job spec or a checkpoint
/// - node selection filters
/// - the context (and its socket on Unix)
/// - the engine run
///
/// Returns the engine result: `0` on success, the number of failed nodes,
/// or `-1` when aborted.
pub async fn run(args: CliArgs) -> Result<i32> {
    if let Some(Command::Ctx { socket, op }) = &args.command {
        return run_ctx(socket.as_deref(), op);
    }

    let mut config = load_and_validate(&args.config)?;
    args.apply_overrides(&mut config);
    validate_launch(&config.launch)?;

    let signals = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());

    if args.abort {
        signals.emit(Signal::Abort)?;
        info!(job = %config.app_name, "ABORT signal sent");
        return Ok(0);
    }
    if args.revive && !args.restart {
        signals.emit(Signal::Revive)?;
        info!(job = %config.app_name, "REVIVE signal sent");
        return Ok(0);
    }

    if !args.dry_run {
        if !config.launch.allow_duplicate_jobs {
            let tick = config.tick_period().unwrap_or_default();
            signals.detect_duplicate(tick).await?;
        }
        signals.consume_all()?;
    }

    let store = CheckpointStore::for_config(&config);
    let resume = args.restart && store.is_restartable();
    if args.restart && !resume {
        info!(
            job = %config.app_name,
            checkpoint = %store.graph_path().display(),
            "nothing to restart from; starting a fresh run"
        );
    }

    let (mut register, restored) = if resume {
        restore(&args, &store, &mut config)?
    } else {
        let path = args.jobspec.as_deref().ok_or_else(|| {
            DagrunError::Config(
                "--jobspec is required when there is no checkpoint to restart from".to_string(),
            )
        })?;
        (load_jobspec(path, &config.log_dir)?, ContextMap::new())
    };

    apply_filters(&args, &mut register)?;

    let values = seed_context(&config, restored, &args.cvars);

    if args.dry_run {
        print_dry_run(&config, &register, &values)?;
        return Ok(0);
    }

    let context = ContextHandle::spawn(values, config.launch.interactive);

    #[cfg(unix)]
    let server = match context::server::ContextServer::start(
        &config.context_socket(),
        context.clone(),
    ) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!(error = %e, "context socket unavailable; process workers cannot share context");
            None
        }
    };
    #[cfg(unix)]
    let socket = server.as_ref().map(|s| s.path().to_path_buf());
    #[cfg(not(unix))]
    let socket = None;

    let mut engine = Engine::new(config, register, context, WorkerRegistry::with_builtins())
        .restarted(resume)
        .with_context_socket(socket);
    let result = engine.run().await;

    #[cfg(unix)]
    if let Some(server) = server {
        server.shutdown().await;
    }

    result
}

/// Rebuild the graph and context from checkpoints and reset it for another
/// run. The checkpointed config replaces the file config; CLI overrides are
/// applied again on top.
fn restore(
    args: &CliArgs,
    store: &CheckpointStore,
    config: &mut AppConfig,
) -> Result<(Register, ContextMap)> {
    let mut register = store.load_graph()?;
    let values = match store.load_context() {
        Ok(ctx) => {
            *config = ctx.config;
            args.apply_overrides(config);
            ctx.values
        }
        Err(e) => {
            warn!(error = %e, "context checkpoint unusable; continuing with a fresh context");
            ContextMap::new()
        }
    };

    let reset = StateManager::new(&mut register).prepare_restart(args.revive);
    info!(
        job = %config.app_name,
        reset = reset.len(),
        revive = args.revive,
        "restored job graph from checkpoint"
    );
    Ok((register, values))
}

fn apply_filters(args: &CliArgs, register: &mut Register) -> Result<()> {
    if !args.has_filters() {
        return Ok(());
    }

    let disable = resolve_all(register, &args.exec_disable)?;
    let only = resolve_all(register, &args.exec_only)?;
    let from = resolve_all(register, &args.exec_from)?;
    let to = resolve_all(register, &args.exec_to)?;

    let mut state = StateManager::new(register);
    if !only.is_empty() {
        state.exec_only(&only);
    }
    if !from.is_empty() {
        state.exec_from(&from);
    }
    if !to.is_empty() {
        state.exec_to(&to);
    }
    if !disable.is_empty() {
        state.exec_disable(&disable);
    }
    Ok(())
}

fn resolve_all(register: &Register, refs: &[String]) -> Result<BTreeSet<NodeId>> {
    refs.iter().map(|r| register.resolve(r)).collect()
}

/// Initial context: `[vars]`, then checkpointed values, then `--cvar`.
fn seed_context(
    config: &AppConfig,
    restored: ContextMap,
    cvars: &[(String, String)],
) -> ContextMap {
    let mut values: ContextMap = config
        .vars
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    values.extend(restored);
    for (key, value) in cvars {
        values.insert(key.clone(), Value::String(value.clone()));
    }
    debug!(keys = values.len(), "seeded context");
    values
}

/// Dry-run output: nodes in dependency order and the seeded context.
fn print_dry_run(config: &AppConfig, register: &Register, values: &ContextMap) -> Result<()> {
    println!("dagrun dry-run: {}", config.app_name);
    println!("  log_dir = {}", config.log_dir.display());
    println!("  max_procs = {}", config.launch.max_procs);
    println!("  tickrate = {}", config.launch.tickrate);
    println!();

    println!("nodes ({}):", register.len());
    for id in topological_order(register)? {
        let Some(node) = register.get(id) else {
            continue;
        };
        println!("  - [{}] {} ({})", id, node.name, node.status().code());
        println!("      worker: {}", node.worker);
        if !node.argv.is_empty() {
            println!("      args: {:?}", node.argv);
        }
        if !node.parents().is_empty() {
            println!("      after: {:?}", node.parents());
        }
        if node.max_attempts > 1 {
            println!(
                "      attempts: {} (wait {:.1}s)",
                node.max_attempts,
                node.retry_wait_time.as_secs_f64()
            );
        }
        if let Some(timeout) = node.timeout {
            println!("      timeout: {:.1}s", timeout.as_secs_f64());
        }
    }

    if !values.is_empty() {
        println!();
        println!("context ({}):", values.len());
        for (key, value) in values {
            println!("  {key} = {value}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

#[cfg(unix)]
fn run_ctx(socket: Option<&Path>, op: &CtxOp) -> Result<i32> {
    use crate::context::client::ContextClient;

    let mut client = match socket {
        Some(path) => ContextClient::connect(path)?,
        None => ContextClient::from_env()?,
    };

    match op {
        CtxOp::Get { key } => match client.get(key)? {
            Some(Value::String(s)) => println!("{s}"),
            Some(value) => println!("{value}"),
            None => return Err(DagrunError::Lookup(format!("context key '{key}' is not set"))),
        },
        CtxOp::Set { key, value } => {
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()));
            client.set(key, value)?;
        }
        CtxOp::Remove { key } => {
            client.remove(key)?;
        }
        CtxOp::Keys => {
            for key in client.keys()? {
                println!("{key}");
            }
        }
    }
    Ok(0)
}

#[cfg(not(unix))]
fn run_ctx(_socket: Option<&Path>, _op: &CtxOp) -> Result<i32> {
    Err(DagrunError::Config(
        "the context socket is only available on Unix".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cvars_override_checkpoint_and_vars() {
        let mut config = AppConfig::for_job("j", "/tmp/j");
        config.vars.insert("a".into(), "file".into());
        config.vars.insert("b".into(), "file".into());

        let mut restored = ContextMap::new();
        restored.insert("b".into(), Value::from(7));
        restored.insert("c".into(), Value::from(true));

        let values = seed_context(&config, restored, &[("c".into(), "cli".into())]);
        assert_eq!(values["a"], Value::from("file"));
        assert_eq!(values["b"], Value::from(7));
        assert_eq!(values["c"], Value::from("cli"));
    }
}
