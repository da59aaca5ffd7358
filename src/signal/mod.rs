// src/signal/mod.rs

//! File-marker signals between `dagrun` invocations.
//!
//! A signal is set while `<dir>/.<job>.<marker>` exists.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{DagrunError, Result};
use crate::types::Signal;

/// Extra wait on top of one tick when probing for a live instance.
pub const PULSE_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SignalChannel {
    dir: PathBuf,
    job: String,
}

impl SignalChannel {
    pub fn new(dir: impl Into<PathBuf>, job: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job: job.into(),
        }
    }

    pub fn marker_path(&self, signal: Signal) -> PathBuf {
        self.dir.join(format!(".{}.{}", self.job, signal.marker()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Set `signal`. Emitting an already-set signal is a no-op.
    pub fn emit(&self, signal: Signal) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.marker_path(signal))?;
        debug!(job = %self.job, %signal, "emitted signal");
        Ok(())
    }

    /// Clear `signal`, returning whether it was set.
    ///
    /// Only one of several concurrent consumers observes `true`.
    pub fn consume(&self, signal: Signal) -> Result<bool> {
        match std::fs::remove_file(self.marker_path(signal)) {
            Ok(()) => {
                debug!(job = %self.job, %signal, "consumed signal");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Signals currently set, without clearing them.
    pub fn peek(&self) -> BTreeSet<Signal> {
        Signal::ALL
            .into_iter()
            .filter(|s| self.marker_path(*s).exists())
            .collect()
    }

    /// Clear every signal, returning the ones that were set.
    pub fn consume_all(&self) -> Result<BTreeSet<Signal>> {
        let mut cleared = BTreeSet::new();
        for signal in Signal::ALL {
            if self.consume(signal)? {
                cleared.insert(signal);
            }
        }
        if !cleared.is_empty() {
            warn!(job = %self.job, signals = ?cleared, "discarded stale signals");
        }
        Ok(cleared)
    }

    /// Fail with [`DagrunError::DuplicateRun`] if another scheduler for this
    /// job is alive.
    ///
    /// A live scheduler consumes PULSE on every tick, so the marker vanishing
    /// within `tick + PULSE_GRACE` means someone else is running.
    pub async fn detect_duplicate(&self, tick: Duration) -> Result<()> {
        self.emit(Signal::Pulse)?;
        tokio::time::sleep(tick + PULSE_GRACE).await;

        if self.peek().contains(&Signal::Pulse) {
            self.consume(Signal::Pulse)?;
            debug!(job = %self.job, "no live instance answered the pulse");
            Ok(())
        } else {
            info!(job = %self.job, "pulse was consumed by a running instance");
            Err(DagrunError::DuplicateRun(format!(
                "job '{}' is already running",
                self.job
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_consume_peek() {
        let dir = tempfile::tempdir().unwrap();
        let ch = SignalChannel::new(dir.path(), "job");

        assert!(ch.peek().is_empty());
        ch.emit(Signal::Abort).unwrap();
        ch.emit(Signal::Abort).unwrap();
        assert!(ch.marker_path(Signal::Abort).ends_with(".job.sig.abort"));
        assert_eq!(ch.peek(), BTreeSet::from([Signal::Abort]));

        assert!(ch.consume(Signal::Abort).unwrap());
        assert!(!ch.consume(Signal::Abort).unwrap());
        assert!(ch.peek().is_empty());
    }

    #[test]
    fn consume_all_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ch = SignalChannel::new(dir.path(), "job");
        ch.emit(Signal::Pulse).unwrap();
        ch.emit(Signal::Revive).unwrap();

        let cleared = ch.consume_all().unwrap();
        assert_eq!(cleared, BTreeSet::from([Signal::Pulse, Signal::Revive]));
        assert!(ch.peek().is_empty());
    }

    #[test]
    fn channels_are_scoped_by_job() {
        let dir = tempfile::tempdir().unwrap();
        let a = SignalChannel::new(dir.path(), "a");
        let b = SignalChannel::new(dir.path(), "b");
        a.emit(Signal::Abort).unwrap();
        assert!(b.peek().is_empty());
    }

    #[tokio::test]
    async fn unanswered_pulse_is_not_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ch = SignalChannel::new(dir.path(), "job");
        ch.detect_duplicate(Duration::from_millis(10)).await.unwrap();
        assert!(ch.peek().is_empty());
    }
}
