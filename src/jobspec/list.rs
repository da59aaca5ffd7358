// src/jobspec/list.rs

//! Pipe-delimited job spec format.
//!
//! ```text
//! #ID|PARENT_IDS|MAX_ATTEMPTS|RETRY_WAIT_TIME|NAME|WORKER|ARGUMENTS|LOGFILE|TIMEOUT
//! 1|-1|3|10|extract|shell|"./extract.sh --full"|extract.log|600
//! 2|1|1|0|load|shell|./load.sh,staging
//! ```
//!
//! The last three fields are optional. `ARGUMENTS` is a comma list; items
//! may be wrapped in single or double quotes to protect commas and pipes.

use std::time::Duration;

use crate::dag::{DepRef, NodeSpec};
use crate::errors::{DagrunError, Result};
use crate::types::NodeId;

pub const HEADER: &str =
    "#ID|PARENT_IDS|MAX_ATTEMPTS|RETRY_WAIT_TIME|NAME|WORKER|ARGUMENTS|LOGFILE|TIMEOUT";

const REQUIRED_FIELDS: usize = 6;

pub fn parse(contents: &str) -> Result<Vec<NodeSpec>> {
    let mut specs = Vec::new();

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        specs.push(parse_line(line).map_err(|e| match e {
            DagrunError::Format(msg) => DagrunError::Format(format!("line {}: {msg}", idx + 1)),
            other => other,
        })?);
    }

    Ok(specs)
}

fn parse_line(line: &str) -> Result<NodeSpec> {
    let fields: Vec<String> = split_quoted(line, '|')
        .into_iter()
        .map(|f| f.trim().to_string())
        .collect();

    if fields.len() < REQUIRED_FIELDS {
        return Err(DagrunError::Format(format!(
            "expected at least {REQUIRED_FIELDS} '|' separated fields, found {}",
            fields.len()
        )));
    }

    let id: NodeId = parse_number(&fields[0], "ID")?;
    let dependencies = fields[1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_number::<NodeId>(s, "PARENT_IDS").map(DepRef::Id))
        .collect::<Result<Vec<_>>>()?;
    let max_attempts: u32 = parse_number(&fields[2], "MAX_ATTEMPTS")?;
    let retry_wait_time = parse_seconds(&fields[3], "RETRY_WAIT_TIME")?;

    let name = fields[4].clone();
    if name.is_empty() {
        return Err(DagrunError::Format(format!("node {id} has an empty NAME")));
    }
    let worker = fields[5].clone();

    let argv = match fields.get(6) {
        Some(args) if !args.is_empty() => split_quoted(args, ',')
            .iter()
            .map(|a| unquote(a.trim()).to_string())
            .collect(),
        _ => Vec::new(),
    };
    let logfile = fields.get(7).filter(|f| !f.is_empty()).map(Into::into);
    let timeout = match fields.get(8) {
        Some(t) if !t.is_empty() => Some(parse_seconds(t, "TIMEOUT")?),
        _ => None,
    };

    let mut spec = NodeSpec::new(id, name, worker);
    spec.dependencies = dependencies;
    spec.max_attempts = max_attempts;
    spec.retry_wait_time = retry_wait_time;
    spec.argv = argv;
    spec.logfile = logfile;
    spec.timeout = timeout;
    Ok(spec)
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DagrunError::Format(format!("{field} '{value}' is not a valid integer")))
}

fn parse_seconds(value: &str, field: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| DagrunError::Format(format!("{field} '{value}' is not a number")))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| DagrunError::Format(format!("{field} must be a non-negative number of seconds")))
}

/// Split on `delim`, ignoring delimiters inside single or double quotes.
/// Quotes are kept; empty fields are preserved.
fn split_quoted(input: &str, delim: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == delim => out.push(std::mem::take(&mut current)),
            None => current.push(c),
        }
    }
    out.push(current);
    out
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
