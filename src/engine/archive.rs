// src/engine/archive.rs

//! Post-run log archival and retention cleanup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::dag::Register;
use crate::errors::Result;
use crate::types::RunOutcome;

/// Move the log files of every node that ran into
/// `<log_dir>/<job>_<YYYYMMDD_HHMMSS>_<OUTCOME>/` and copy the graph
/// checkpoint next to them.
///
/// Returns the archive directory, or `None` when there was nothing to
/// archive.
pub fn archive_logs(
    log_dir: &Path,
    job: &str,
    register: &Register,
    outcome: RunOutcome,
    graph_checkpoint: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let logs: Vec<&Path> = register
        .nodes()
        .filter(|n| n.attempts() > 0)
        .map(|n| n.logfile.as_path())
        .filter(|p| p.is_file())
        .collect();
    let checkpoint = graph_checkpoint.filter(|p| p.is_file());

    if logs.is_empty() && checkpoint.is_none() {
        debug!("no logs to archive");
        return Ok(None);
    }

    let dir = log_dir.join(format!(
        "{job}_{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        outcome.label()
    ));
    fs::create_dir_all(&dir)?;

    let mut moved = 0usize;
    for log in logs {
        let Some(name) = log.file_name() else {
            continue;
        };
        let target = dir.join(name);
        if target.exists() {
            // Several nodes may share one log file.
            continue;
        }
        move_file(log, &target)?;
        moved += 1;
    }

    if let Some(checkpoint) = checkpoint {
        if let Some(name) = checkpoint.file_name() {
            fs::copy(checkpoint, dir.join(name))?;
        }
    }

    info!(archive = %dir.display(), logs = moved, "archived node logs");
    Ok(Some(dir))
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_err() {
        // Different filesystems.
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Delete entries directly under `log_root_dir` last modified more than
/// `retention_days` ago. A negative retention disables cleanup. `keep` and
/// anything containing it are never removed.
pub fn cleanup_logs(log_root_dir: &Path, retention_days: i64, keep: &Path) -> Result<usize> {
    if retention_days < 0 || !log_root_dir.is_dir() {
        return Ok(0);
    }

    let max_age = Duration::from_secs(retention_days.unsigned_abs() * 24 * 60 * 60);
    let now = SystemTime::now();
    let mut removed = 0usize;

    for entry in fs::read_dir(log_root_dir)? {
        let entry = entry?;
        let path = entry.path();
        if keep.starts_with(&path) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read log entry age");
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed expired log entry");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove expired log entry"),
        }
    }

    if removed > 0 {
        info!(removed, retention_days, "cleaned up old logs");
    }
    Ok(removed)
}
