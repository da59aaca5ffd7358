#![allow(dead_code)]

//! Scripted workers for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use dagrun::exec::{Runnable, WorkerContext, WorkerFuture};

/// Exits with a fixed code.
#[derive(Debug, Clone, Copy)]
pub struct ExitWith(pub i32);

impl Runnable for ExitWith {
    fn run(&self, _ctx: WorkerContext) -> WorkerFuture<'_> {
        let code = self.0;
        Box::pin(async move { Ok(code) })
    }
}

/// Sleeps, then succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SleepThenSucceed(pub Duration);

impl Runnable for SleepThenSucceed {
    fn run(&self, _ctx: WorkerContext) -> WorkerFuture<'_> {
        let wait = self.0;
        Box::pin(async move {
            tokio::time::sleep(wait).await;
            Ok(0)
        })
    }
}

/// Fails with `code` for the first `failures` attempts of each node, then
/// succeeds. Counts calls per node name.
#[derive(Debug, Default)]
pub struct FailTimes {
    failures: usize,
    code: i32,
    calls: Mutex<HashMap<String, usize>>,
}

impl FailTimes {
    pub fn new(failures: usize, code: i32) -> Self {
        Self {
            failures,
            code,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, node: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(node)
            .copied()
            .unwrap_or_default()
    }
}

impl Runnable for FailTimes {
    fn run(&self, ctx: WorkerContext) -> WorkerFuture<'_> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(ctx.node_name.clone()).or_default();
            *n += 1;
            *n
        };
        let code = if call <= self.failures { self.code } else { 0 };
        Box::pin(async move { Ok(code) })
    }
}

/// Records how many attempts run at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    hold: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<(String, Instant)>>,
}

impl ConcurrencyProbe {
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            ..Self::default()
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Node names in start order.
    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Start instants, in start order.
    pub fn start_times(&self) -> Vec<Instant> {
        self.started.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

impl Runnable for ConcurrencyProbe {
    fn run(&self, ctx: WorkerContext) -> WorkerFuture<'_> {
        Box::pin(async move {
            self.started
                .lock()
                .unwrap()
                .push((ctx.node_name.clone(), Instant::now()));
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(0)
        })
    }
}

/// Reads `key` from the context (waiting in interactive mode) and writes
/// it back under `<key>_seen`.
#[derive(Debug, Clone)]
pub struct EchoContext(pub &'static str);

impl Runnable for EchoContext {
    fn run(&self, ctx: WorkerContext) -> WorkerFuture<'_> {
        let key = self.0;
        Box::pin(async move {
            let value = ctx
                .context
                .get(key)
                .await
                .with_context(|| format!("reading context key '{key}'"))?;
            match value {
                Some(v) => {
                    ctx.context
                        .set(format!("{key}_seen"), v)
                        .await
                        .with_context(|| format!("writing context key '{key}_seen'"))?;
                    Ok(0)
                }
                None => Ok(1),
            }
        })
    }
}
