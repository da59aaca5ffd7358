// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Expand `${...}` placeholders (`interpolate.rs`).
//! - Validate values and resolve directories (`validate.rs`).

pub mod interpolate;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{AppConfig, FrameworkSection, LaunchSection, RawConfig};
pub use validate::{resolve_config, validate_launch};
