// src/errors.rs

//! Crate-wide error type and exit-status mapping.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagrunError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Cycle detected in job graph: {0}")]
    Cycle(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Duplicate run: {0}")]
    DuplicateRun(String),

    #[error("Checkpoint error: {0}")]
    Persistence(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagrunError {
    /// Process exit status for a run that stopped on this error.
    ///
    /// Distinct per category so callers can tell causes apart without
    /// parsing messages. Engine results (0, failed count, -1) never use
    /// these paths.
    pub fn exit_status(&self) -> i32 {
        match self {
            DagrunError::Config(_)
            | DagrunError::Format(_)
            | DagrunError::Graph(_)
            | DagrunError::Cycle(_)
            | DagrunError::Toml(_)
            | DagrunError::Json(_) => 2,
            DagrunError::NotFound(_) | DagrunError::Lookup(_) => 3,
            DagrunError::Interrupted => 4,
            DagrunError::Runtime(_) | DagrunError::Persistence(_) => 5,
            DagrunError::Io(_) | DagrunError::DuplicateRun(_) => 6,
            DagrunError::Other(_) => 99,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagrunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_distinct_statuses() {
        assert_eq!(DagrunError::Config("x".into()).exit_status(), 2);
        assert_eq!(DagrunError::Lookup("x".into()).exit_status(), 3);
        assert_eq!(DagrunError::Interrupted.exit_status(), 4);
        assert_eq!(DagrunError::Runtime("x".into()).exit_status(), 5);
        assert_eq!(DagrunError::DuplicateRun("x".into()).exit_status(), 6);
        assert_eq!(
            DagrunError::Other(anyhow::anyhow!("boom")).exit_status(),
            99
        );
    }
}
