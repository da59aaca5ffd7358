// src/jobspec/json.rs

//! JSON job spec format.
//!
//! ```json
//! {
//!   "tasks": {
//!     "extract": { "worker": "shell", "arguments": ["./extract.sh"] },
//!     "load": { "worker": "shell", "dependencies": ["extract"], "max_attempts": 3 }
//!   }
//! }
//! ```
//!
//! Node ids are assigned from 1 in document order.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::dag::{DepRef, NodeSpec};
use crate::errors::{DagrunError, Result};

#[derive(Debug, Deserialize)]
struct JobDocument {
    tasks: OrderedTasks,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    worker: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default)]
    retry_wait_time: f64,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    logfile: Option<PathBuf>,
    #[serde(default)]
    timeout: Option<f64>,
}

fn default_max_attempts() -> u32 {
    1
}

/// `tasks` object kept in document order, duplicate keys included.
#[derive(Debug)]
struct OrderedTasks(Vec<(String, TaskEntry)>);

impl<'de> Deserialize<'de> for OrderedTasks {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TasksVisitor;

        impl<'de> Visitor<'de> for TasksVisitor {
            type Value = OrderedTasks;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping task names to task definitions")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, entry)) = map.next_entry::<String, TaskEntry>()? {
                    entries.push((name, entry));
                }
                Ok(OrderedTasks(entries))
            }
        }

        deserializer.deserialize_map(TasksVisitor)
    }
}

pub fn parse(contents: &str) -> Result<Vec<NodeSpec>> {
    let doc: JobDocument = serde_json::from_str(contents)?;

    let mut specs: Vec<NodeSpec> = Vec::with_capacity(doc.tasks.0.len());
    for (idx, (name, task)) in doc.tasks.0.into_iter().enumerate() {
        if specs.iter().any(|s| s.name == name) {
            return Err(DagrunError::Format(format!(
                "task name '{name}' has already been registered"
            )));
        }

        let mut spec = NodeSpec::new(idx as i64 + 1, name, task.worker);
        spec.dependencies = task.dependencies.into_iter().map(DepRef::Name).collect();
        spec.max_attempts = task.max_attempts;
        spec.retry_wait_time = seconds(task.retry_wait_time, "retry_wait_time", &spec.name)?;
        spec.argv = task.arguments;
        spec.logfile = task.logfile;
        spec.timeout = task
            .timeout
            .map(|t| seconds(t, "timeout", &spec.name))
            .transpose()?;
        specs.push(spec);
    }

    Ok(specs)
}

fn seconds(value: f64, field: &str, task: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        DagrunError::Format(format!(
            "task '{task}': {field} must be a non-negative number of seconds (got {value})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_document_order() {
        let specs = parse(
            r#"{"tasks": {
                "zeta": {"worker": "shell", "arguments": ["echo z"]},
                "alpha": {"worker": "shell", "dependencies": ["zeta"],
                          "max_attempts": 2, "retry_wait_time": 1.5, "timeout": 30}
            }}"#,
        )
        .unwrap();

        assert_eq!(specs[0].id, 1);
        assert_eq!(specs[0].name, "zeta");
        assert_eq!(specs[1].id, 2);
        assert_eq!(specs[1].dependencies, vec![DepRef::Name("zeta".into())]);
        assert_eq!(specs[1].max_attempts, 2);
        assert_eq!(specs[1].retry_wait_time, Duration::from_millis(1500));
        assert_eq!(specs[1].timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn duplicate_names_are_format_errors() {
        let err = parse(
            r#"{"tasks": {"a": {"worker": "shell"}, "a": {"worker": "shell"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DagrunError::Format(msg) if msg.contains("'a'")));
    }

    #[test]
    fn missing_worker_is_json_error() {
        let err = parse(r#"{"tasks": {"a": {}}}"#).unwrap_err();
        assert!(matches!(err, DagrunError::Json(_)));
    }
}
