// src/checkpoint/mod.rs

//! Durable snapshots of a run, used to restart after a crash or abort.
//!
//! Two files per job, both versioned JSON:
//!
//! - `<temp_dir>/<job>.ctllog`: every node with edges, status, attempts and
//!   timings ([`GraphCheckpoint`]).
//! - `<temp_dir>/<job>.ctx`: the context map plus the effective config
//!   ([`ContextCheckpoint`]).
//!
//! Writes go to `<file>.tmp` first and are renamed into place, so readers
//! only ever see a complete checkpoint.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::context::ContextMap;
use crate::dag::{DepRef, NodeSpec, Register};
use crate::errors::{DagrunError, Result};
use crate::types::{NodeId, NodeStatus};

/// Bumped on every incompatible schema change. Older or newer files are
/// rejected instead of being half-read.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    pub parents: Vec<NodeId>,
    pub worker: String,
    pub argv: Vec<String>,
    pub logfile: PathBuf,
    pub max_attempts: u32,
    /// Seconds.
    pub retry_wait_time: f64,
    /// Seconds.
    pub timeout: Option<f64>,
    pub status: NodeStatus,
    pub attempts: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphCheckpoint {
    pub version: u32,
    pub job: String,
    pub nodes: Vec<NodeRecord>,
}

impl GraphCheckpoint {
    pub fn from_register(job: &str, register: &Register) -> Self {
        let nodes = register
            .nodes()
            .map(|n| NodeRecord {
                id: n.id(),
                name: n.name.clone(),
                parents: n.parents().iter().copied().collect(),
                worker: n.worker.clone(),
                argv: n.argv.clone(),
                logfile: n.logfile.clone(),
                max_attempts: n.max_attempts,
                retry_wait_time: n.retry_wait_time.as_secs_f64(),
                timeout: n.timeout.map(|t| t.as_secs_f64()),
                status: n.status(),
                attempts: n.attempts(),
                start_time: n.start_time(),
                end_time: n.end_time(),
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            job: job.to_string(),
            nodes,
        }
    }

    /// Rebuild the register exactly as it was saved.
    pub fn into_register(self) -> Result<Register> {
        let mut specs = Vec::with_capacity(self.nodes.len());
        let mut runtime = Vec::with_capacity(self.nodes.len());

        for rec in self.nodes {
            let mut spec = NodeSpec::new(rec.id, rec.name, rec.worker);
            spec.dependencies = rec.parents.into_iter().map(DepRef::Id).collect();
            spec.argv = rec.argv;
            spec.logfile = Some(rec.logfile);
            spec.max_attempts = rec.max_attempts;
            spec.retry_wait_time = secs(rec.retry_wait_time)?;
            spec.timeout = rec.timeout.map(secs).transpose()?;
            spec.status = rec.status;
            specs.push(spec);
            runtime.push((rec.id, rec.attempts, rec.start_time, rec.end_time));
        }

        let mut register = Register::from_specs(specs, Path::new(""))?;
        for (id, attempts, start, end) in runtime {
            if let Some(node) = register.get_mut(id) {
                node.attempts = attempts;
                node.start_time = start;
                node.end_time = end;
            }
        }
        Ok(register)
    }
}

fn secs(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| DagrunError::Persistence(format!("invalid duration {value} in checkpoint: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCheckpoint {
    pub version: u32,
    pub config: AppConfig,
    pub values: ContextMap,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Reads and writes the two checkpoint files of one job.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    graph_path: PathBuf,
    context_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(graph_path: impl Into<PathBuf>, context_path: impl Into<PathBuf>) -> Self {
        Self {
            graph_path: graph_path.into(),
            context_path: context_path.into(),
        }
    }

    pub fn for_config(config: &AppConfig) -> Self {
        Self::new(config.ctllog_file(), config.ctx_file())
    }

    pub fn graph_path(&self) -> &Path {
        &self.graph_path
    }

    pub fn context_path(&self) -> &Path {
        &self.context_path
    }

    /// A previous run left a graph checkpoint behind.
    pub fn is_restartable(&self) -> bool {
        self.graph_path.is_file()
    }

    pub fn save_graph(&self, job: &str, register: &Register) -> Result<()> {
        let checkpoint = GraphCheckpoint::from_register(job, register);
        write_atomic(&self.graph_path, &checkpoint)?;
        debug!(path = %self.graph_path.display(), nodes = checkpoint.nodes.len(), "saved graph checkpoint");
        Ok(())
    }

    pub fn save_context(&self, config: &AppConfig, values: ContextMap) -> Result<()> {
        let checkpoint = ContextCheckpoint {
            version: CHECKPOINT_VERSION,
            config: config.clone(),
            values,
        };
        write_atomic(&self.context_path, &checkpoint)?;
        debug!(path = %self.context_path.display(), "saved context checkpoint");
        Ok(())
    }

    pub fn load_graph(&self) -> Result<Register> {
        let checkpoint: GraphCheckpoint = read_versioned(&self.graph_path)?;
        info!(
            path = %self.graph_path.display(),
            job = %checkpoint.job,
            nodes = checkpoint.nodes.len(),
            "loaded graph checkpoint"
        );
        checkpoint.into_register()
    }

    pub fn load_context(&self) -> Result<ContextCheckpoint> {
        read_versioned(&self.context_path)
    }

    /// Remove both files. Missing files are not an error.
    pub fn delete(&self) -> Result<()> {
        for path in [&self.graph_path, &self.context_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "deleted checkpoint"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to delete checkpoint");
                    return Err(DagrunError::Persistence(format!(
                        "deleting {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persist = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };

    persist().map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to write checkpoint");
        DagrunError::Persistence(format!("writing {}: {e}", path.display()))
    })
}

fn read_versioned<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to read checkpoint");
        DagrunError::Persistence(format!("reading {}: {e}", path.display()))
    })?;

    let probe: VersionProbe = serde_json::from_slice(&bytes).map_err(|e| {
        DagrunError::Persistence(format!("{} is not a checkpoint: {e}", path.display()))
    })?;
    if probe.version != CHECKPOINT_VERSION {
        return Err(DagrunError::Persistence(format!(
            "{} has checkpoint version {}, expected {CHECKPOINT_VERSION}",
            path.display(),
            probe.version
        )));
    }

    serde_json::from_slice(&bytes).map_err(|e| {
        DagrunError::Persistence(format!("{} is corrupt: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register() -> Register {
        let mut a = NodeSpec::new(1, "a", "shell");
        a.argv = vec!["echo a".into()];
        let mut b = NodeSpec::new(2, "b", "shell");
        b.dependencies = vec![DepRef::Id(1)];
        b.max_attempts = 3;
        b.retry_wait_time = Duration::from_millis(1500);
        b.timeout = Some(Duration::from_secs(9));
        Register::from_specs(vec![a, b], Path::new("/logs")).unwrap()
    }

    #[test]
    fn graph_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("j.ctllog"), dir.path().join("j.ctx"));

        let mut reg = register();
        reg.transition(1, NodeStatus::Completed).unwrap();
        if let Some(n) = reg.get_mut(1) {
            n.attempts = 2;
            n.start_time = Some(Utc::now());
            n.end_time = Some(Utc::now());
        }

        store.save_graph("j", &reg).unwrap();
        assert!(store.is_restartable());
        let back = store.load_graph().unwrap();

        assert_eq!(
            GraphCheckpoint::from_register("j", &back),
            GraphCheckpoint::from_register("j", &reg)
        );
        assert_eq!(back.get(2).unwrap().parents().iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(back.status_of(1), Some(NodeStatus::Completed));
        assert_eq!(back.get(1).unwrap().attempts(), 2);
        back.check_invariant().unwrap();
    }

    #[test]
    fn context_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("j.ctllog"), dir.path().join("j.ctx"));
        let config = AppConfig::for_job("j", dir.path());
        let values = ContextMap::from([("k".to_string(), serde_json::json!([1, 2]))]);

        store.save_context(&config, values.clone()).unwrap();
        let back = store.load_context().unwrap();
        assert_eq!(back.config, config);
        assert_eq!(back.values, values);

        store.delete().unwrap();
        store.delete().unwrap();
        assert!(!store.context_path().exists());
        assert!(!store.is_restartable());
    }

    #[test]
    fn unknown_version_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.ctllog");
        fs::write(&path, r#"{"version": 99, "job": "j", "nodes": []}"#).unwrap();

        let store = CheckpointStore::new(&path, dir.path().join("j.ctx"));
        let err = store.load_graph().unwrap_err();
        assert!(matches!(err, DagrunError::Persistence(msg) if msg.contains("version 99")));
    }

    #[test]
    fn no_temp_file_is_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("j.ctllog"), dir.path().join("j.ctx"));
        store.save_graph("j", &register()).unwrap();
        assert!(!dir.path().join("j.ctllog.tmp").exists());
    }
}
