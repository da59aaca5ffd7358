// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{AppConfig, RawConfig};
use crate::config::validate::resolve_config;
use crate::errors::{DagrunError, Result};

/// Load a configuration file and return the raw [`RawConfig`].
///
/// This only performs TOML deserialization; it does **not** validate or
/// expand placeholders. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfig> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(DagrunError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path)?;

    let config: RawConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path, validate it and resolve all
/// directories.
///
/// The directory containing the file is the default `app_root_dir`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<AppConfig> {
    let raw = load_from_path(&path)?;
    resolve_config(raw, &config_root_dir(path.as_ref()))
}

/// Directory a config file lives in, falling back to the current directory
/// for bare file names.
fn config_root_dir(config_path: &Path) -> PathBuf {
    let parent = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::canonicalize(&parent).unwrap_or(parent)
}

/// Default config path: `dagrun.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("dagrun.toml")
}
