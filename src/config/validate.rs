// src/config/validate.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::interpolate::interpolate;
use crate::config::model::{AppConfig, LaunchSection, RawConfig};
use crate::errors::{DagrunError, Result};

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("app name regex is valid"));

impl TryFrom<RawConfig> for AppConfig {
    type Error = DagrunError;

    /// Resolve relative directories against the current working directory.
    fn try_from(raw: RawConfig) -> std::result::Result<Self, Self::Error> {
        let cwd = std::env::current_dir()?;
        resolve_config(raw, &cwd)
    }
}

/// Validate `raw` and expand its placeholders.
///
/// `base_dir` is the default `app_root_dir` and the anchor for a relative
/// one (normally the directory containing the config file).
pub fn resolve_config(raw: RawConfig, base_dir: &Path) -> Result<AppConfig> {
    let app_name = validate_app_name(raw.framework.app_name.as_deref())?;
    validate_launch(&raw.launch)?;

    let mut known: HashMap<String, String> = HashMap::new();
    known.insert(
        "date".to_string(),
        chrono::Local::now().format("%Y-%m-%d").to_string(),
    );
    known.insert("app_name".to_string(), app_name.clone());

    let app_root_dir = match raw.framework.app_root_dir.as_deref() {
        Some(dir) => anchor(base_dir, &interpolate(dir, &known)?),
        None => base_dir.to_path_buf(),
    };
    known.insert("app_root_dir".to_string(), display(&app_root_dir));

    let temp_dir = anchor(&app_root_dir, &interpolate(&raw.framework.temp_dir, &known)?);
    known.insert("temp_dir".to_string(), display(&temp_dir));

    let log_root_dir = anchor(&app_root_dir, &interpolate(&raw.framework.log_root_dir, &known)?);
    known.insert("log_root_dir".to_string(), display(&log_root_dir));

    let log_dir = anchor(&app_root_dir, &interpolate(&raw.framework.log_dir, &known)?);

    Ok(AppConfig {
        app_name,
        app_root_dir,
        temp_dir,
        log_root_dir,
        log_dir,
        log_retention: raw.framework.log_retention,
        launch: raw.launch,
        vars: raw.vars,
    })
}

fn validate_app_name(name: Option<&str>) -> Result<String> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(DagrunError::Config(
            "[framework].app_name must be set".to_string(),
        ));
    }
    if !APP_NAME.is_match(name) {
        return Err(DagrunError::Config(format!(
            "[framework].app_name '{name}' may only contain letters, digits, '_', '.' and '-'"
        )));
    }
    Ok(name.to_string())
}

/// Checks shared by the file loader and CLI overrides.
pub fn validate_launch(launch: &LaunchSection) -> Result<()> {
    if !launch.time_between_tasks.is_finite() || launch.time_between_tasks < 0.0 {
        return Err(DagrunError::Config(format!(
            "[launch].time_between_tasks must be >= 0 (got {})",
            launch.time_between_tasks
        )));
    }
    if !launch.save_interval.is_finite() || launch.save_interval < 0.0 {
        return Err(DagrunError::Config(format!(
            "[launch].save_interval must be >= 0 (got {})",
            launch.save_interval
        )));
    }
    Ok(())
}

fn anchor(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
