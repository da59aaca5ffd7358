// src/config/interpolate.rs

//! `${name}` placeholder expansion for `[framework]` values.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{DagrunError, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

/// Expand every `${name}` in `value`.
///
/// Lookup order: `known` (earlier framework keys, `date`), then the process
/// environment. An unresolved placeholder is a configuration error.
pub fn interpolate(value: &str, known: &HashMap<String, String>) -> Result<String> {
    let mut missing: Option<String> = None;

    let expanded = PLACEHOLDER.replace_all(value, |caps: &Captures<'_>| {
        let key = &caps[1];
        if let Some(v) = known.get(key) {
            return v.clone();
        }
        match std::env::var(key) {
            Ok(v) => v,
            Err(_) => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(DagrunError::Config(format!(
            "unresolved placeholder '${{{key}}}' in '{value}'"
        ))),
        None => Ok(expanded.into_owned()),
    }
}
