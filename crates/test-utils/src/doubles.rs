#![allow(dead_code)]

//! Test doubles for the engine's prompter and notifier seams.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use dagrun::context::Prompter;
use dagrun::engine::{Notifier, RunReport};
use dagrun::errors::{DagrunError, Result};

/// Answers interactive requests from a fixed table and remembers the keys
/// it was asked for.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompter {
    answers: HashMap<String, String>,
    asked: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            asked: Arc::default(),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        self.asked.lock().unwrap().push(key.to_string());
        let answer = self
            .answers
            .get(key)
            .cloned()
            .ok_or_else(|| DagrunError::Lookup(format!("no scripted answer for '{key}'")));
        Box::pin(async move { answer })
    }
}

/// Keeps every report and its attachments.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(RunReport, Vec<PathBuf>)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(RunReport, Vec<PathBuf>)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, report: &RunReport, attachments: &[PathBuf]) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((report.clone(), attachments.to_vec()));
        Ok(())
    }
}
