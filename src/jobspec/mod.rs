// src/jobspec/mod.rs

//! Job specification parsing.
//!
//! Two on-disk formats describe the same thing, a list of [`NodeSpec`]s:
//!
//! - [`list`]: one pipe-delimited line per node, referencing parents by id.
//! - [`json`]: a `{"tasks": {...}}` document keyed by node name.
//!
//! The format is picked from the file extension; both end in a validated
//! [`Register`].

pub mod json;
pub mod list;

use std::fs;
use std::path::Path;

use tracing::info;

use crate::dag::{NodeSpec, Register};
use crate::errors::{DagrunError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSpecFormat {
    List,
    Json,
}

impl JobSpecFormat {
    /// `.json` files are JSON; everything else is the line format.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => JobSpecFormat::Json,
            _ => JobSpecFormat::List,
        }
    }
}

/// Read and parse a job spec file into node specs.
pub fn parse_file(path: &Path) -> Result<Vec<NodeSpec>> {
    if !path.is_file() {
        return Err(DagrunError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path)?;

    let specs = match JobSpecFormat::from_path(path) {
        JobSpecFormat::List => list::parse(&contents)?,
        JobSpecFormat::Json => json::parse(&contents)?,
    };

    if specs.is_empty() {
        return Err(DagrunError::Format(format!(
            "job spec {} defines no tasks",
            path.display()
        )));
    }
    Ok(specs)
}

/// Parse `path` and build the node register, resolving log files against
/// `log_dir`.
pub fn load_jobspec(path: &Path, log_dir: &Path) -> Result<Register> {
    let specs = parse_file(path)?;
    let register = Register::from_specs(specs, log_dir)?;
    info!(path = %path.display(), nodes = register.len(), "loaded job spec");
    Ok(register)
}
