// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration as read from a TOML file, before interpolation and
/// validation.
///
/// ```toml
/// [framework]
/// app_name = "nightly_load"
/// temp_dir = "${app_root_dir}/temp"
/// log_dir = "${log_root_dir}/${date}"
///
/// [launch]
/// tickrate = 2
/// max_procs = 4
///
/// [vars]
/// target_schema = "staging"
/// ```
///
/// All sections are optional except `framework.app_name`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub framework: FrameworkSection,

    #[serde(default)]
    pub launch: LaunchSection,

    /// User-defined values seeded into the shared context before the run.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

/// `[framework]` section. Values may reference `${...}` placeholders.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameworkSection {
    /// Job name; scopes checkpoint files and signal markers.
    #[serde(default)]
    pub app_name: Option<String>,

    /// Defaults to the directory holding the config file.
    #[serde(default)]
    pub app_root_dir: Option<String>,

    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    #[serde(default = "default_log_root_dir")]
    pub log_root_dir: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Days to keep entries under `log_root_dir`; negative disables cleanup.
    #[serde(default = "default_log_retention")]
    pub log_retention: i64,
}

fn default_temp_dir() -> String {
    "${app_root_dir}/temp".to_string()
}

fn default_log_root_dir() -> String {
    "${app_root_dir}/logs".to_string()
}

fn default_log_dir() -> String {
    "${log_root_dir}/${date}".to_string()
}

fn default_log_retention() -> i64 {
    30
}

impl Default for FrameworkSection {
    fn default() -> Self {
        Self {
            app_name: None,
            app_root_dir: None,
            temp_dir: default_temp_dir(),
            log_root_dir: default_log_root_dir(),
            log_dir: default_log_dir(),
            log_retention: default_log_retention(),
        }
    }
}

/// `[launch]` section: engine behaviour. CLI flags override these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSection {
    /// Scheduler ticks per second; `0` runs ticks back to back.
    #[serde(default = "default_tickrate")]
    pub tickrate: u32,

    /// Maximum concurrently running nodes; `0` means unlimited.
    #[serde(default)]
    pub max_procs: usize,

    /// Minimum seconds between two launches, across all nodes.
    #[serde(default)]
    pub time_between_tasks: f64,

    /// Seconds between periodic checkpoints.
    #[serde(default = "default_save_interval")]
    pub save_interval: f64,

    #[serde(default = "default_true")]
    pub notify_on_success: bool,

    #[serde(default = "default_true")]
    pub notify_on_fail: bool,

    #[serde(default)]
    pub allow_duplicate_jobs: bool,

    /// Suppress the per-tick progress summary.
    #[serde(default)]
    pub silent: bool,

    /// Move node logs into a per-run archive directory after the run.
    #[serde(default = "default_true")]
    pub archive_logs: bool,

    /// Prompt for context keys that workers read but nobody has set.
    #[serde(default)]
    pub interactive: bool,

    /// Write checkpoints during and after the run.
    #[serde(default = "default_true")]
    pub checkpointing: bool,
}

fn default_tickrate() -> u32 {
    1
}

fn default_save_interval() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

impl Default for LaunchSection {
    fn default() -> Self {
        Self {
            tickrate: default_tickrate(),
            max_procs: 0,
            time_between_tasks: 0.0,
            save_interval: default_save_interval(),
            notify_on_success: true,
            notify_on_fail: true,
            allow_duplicate_jobs: false,
            silent: false,
            archive_logs: true,
            interactive: false,
            checkpointing: true,
        }
    }
}

/// Validated, fully resolved configuration.
///
/// Serialised into the context checkpoint so a restart sees the same
/// settings as the interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub app_root_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub log_root_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_retention: i64,
    pub launch: LaunchSection,
    pub vars: BTreeMap<String, String>,
}

impl AppConfig {
    /// Defaults for a job rooted at `root` (temp and logs below it).
    pub fn for_job(app_name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            app_name: app_name.into(),
            temp_dir: root.join("temp"),
            log_root_dir: root.join("logs"),
            log_dir: root.join("logs"),
            app_root_dir: root,
            log_retention: default_log_retention(),
            launch: LaunchSection::default(),
            vars: BTreeMap::new(),
        }
    }

    /// Graph checkpoint: `<temp_dir>/<app_name>.ctllog`.
    pub fn ctllog_file(&self) -> PathBuf {
        self.temp_dir.join(format!("{}.ctllog", self.app_name))
    }

    /// Context checkpoint: `<temp_dir>/<app_name>.ctx`.
    pub fn ctx_file(&self) -> PathBuf {
        self.temp_dir.join(format!("{}.ctx", self.app_name))
    }

    /// Socket on which the shared context is served to worker processes.
    pub fn context_socket(&self) -> PathBuf {
        self.temp_dir.join(format!(".{}.ctx.sock", self.app_name))
    }

    /// Length of one scheduler tick, or `None` when ticks should not sleep.
    pub fn tick_period(&self) -> Option<Duration> {
        match self.launch.tickrate {
            0 => None,
            rate => Some(Duration::from_secs_f64(1.0 / f64::from(rate))),
        }
    }

    pub fn max_procs(&self) -> Option<usize> {
        match self.launch.max_procs {
            0 => None,
            n => Some(n),
        }
    }

    pub fn time_between_tasks(&self) -> Duration {
        Duration::from_secs_f64(self.launch.time_between_tasks)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs_f64(self.launch.save_interval)
    }
}
