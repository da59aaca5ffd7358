#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use dagrun::config::AppConfig;
use dagrun::dag::{DepRef, NodeSpec, Register};
use dagrun::types::NodeId;

/// Builder for a [`Register`] to simplify test setup.
///
/// Nodes get ids `1..` in insertion order unless [`GraphBuilder::node_with_id`]
/// is used.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    specs: Vec<NodeSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root node running `worker`.
    pub fn node(self, name: &str, worker: &str) -> Self {
        let id = self.specs.len() as NodeId + 1;
        self.node_with_id(id, name, worker)
    }

    pub fn node_with_id(mut self, id: NodeId, name: &str, worker: &str) -> Self {
        self.specs.push(NodeSpec::new(id, name, worker));
        self
    }

    /// Make the last added node depend on `parent` (by name).
    pub fn after(mut self, parent: &str) -> Self {
        self.last().dependencies.push(DepRef::Name(parent.to_string()));
        self
    }

    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.last().max_attempts = max_attempts;
        self
    }

    pub fn retry_wait(mut self, wait: Duration) -> Self {
        self.last().retry_wait_time = wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.last().timeout = Some(timeout);
        self
    }

    pub fn args(mut self, argv: &[&str]) -> Self {
        self.last().argv = argv.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn specs(self) -> Vec<NodeSpec> {
        self.specs
    }

    pub fn build(self, log_dir: &Path) -> Register {
        Register::from_specs(self.specs, log_dir).expect("Failed to build valid register from builder")
    }

    fn last(&mut self) -> &mut NodeSpec {
        self.specs
            .last_mut()
            .expect("add a node before configuring it")
    }
}

/// Config for engine tests: fast ticks, quiet output, no archival or
/// retention cleanup, everything below `root`.
pub fn test_config(job: &str, root: &Path) -> AppConfig {
    let mut config = AppConfig::for_job(job, root);
    config.launch.tickrate = 200;
    config.launch.silent = true;
    config.launch.archive_logs = false;
    config.launch.save_interval = 0.0;
    config.log_retention = -1;
    config
}

/// Write a TOML config for `job` rooted at `root` and return its path.
pub fn write_config(root: &Path, job: &str, extra_launch: &str) -> std::path::PathBuf {
    let path = root.join("dagrun.toml");
    let contents = format!(
        "[framework]\napp_name = \"{job}\"\nlog_dir = \"${{log_root_dir}}\"\nlog_retention = -1\n\n[launch]\ntickrate = 200\nsilent = true\narchive_logs = false\n{extra_launch}\n"
    );
    std::fs::write(&path, contents).expect("write test config");
    path
}
