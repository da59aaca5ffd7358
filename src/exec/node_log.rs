// src/exec/node_log.rs

//! Controller-side messages in a node's log file.
//!
//! Worker output goes to the same file; these helpers only add the lines the
//! lifecycle itself writes (attempt markers, retry notices, terminations).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;
use tracing::warn;

/// Append one `[timestamp] LEVEL message` line, creating the file and its
/// directory as needed. Failures are logged, never propagated.
pub fn append(path: &Path, level: &str, message: &str) {
    if let Err(e) = try_append(path, level, message) {
        warn!(logfile = %path.display(), error = %e, "failed to write node log");
    }
}

fn try_append(path: &Path, level: &str, message: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "[{}] {level:<7} {message}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn system(path: &Path, message: &str) {
    append(path, "SYSTEM", message);
}

pub fn error(path: &Path, message: &str) {
    append(path, "ERROR", message);
}
