// src/context/mod.rs

//! Shared key/value context.
//!
//! One actor task owns the map; everything else talks to it through a
//! cloneable [`ContextHandle`]. Writes are last-write-wins per key and there
//! are no multi-key transactions.
//!
//! In interactive mode a [`ContextHandle::get`] on a missing key does not
//! return `None`: the key is queued as a request and the caller waits until
//! somebody sets it. The engine drains the queue every tick via
//! [`ContextHandle::take_requests`] and asks a [`Prompter`] for the values.
//!
//! Worker processes reach the same map through the Unix socket served by
//! [`server::ContextServer`].

#[cfg(unix)]
pub mod client;
#[cfg(unix)]
pub mod server;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::Write as _;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::errors::{DagrunError, Result};

pub type ContextMap = BTreeMap<String, Value>;

/// Environment variable carrying the context socket path into worker
/// processes.
pub const SOCKET_ENV: &str = "DAGRUN_CONTEXT_SOCKET";

enum Command {
    Get {
        key: String,
        wait: bool,
        reply: oneshot::Sender<Option<Value>>,
    },
    Set {
        key: String,
        value: Value,
    },
    Remove {
        key: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    Keys {
        reply: oneshot::Sender<Vec<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<ContextMap>,
    },
    Extend {
        values: ContextMap,
    },
    TakeRequests {
        reply: oneshot::Sender<Vec<String>>,
    },
    SetInteractive {
        interactive: bool,
    },
}

/// Cloneable access to the context actor.
#[derive(Clone, Debug)]
pub struct ContextHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ContextHandle {
    /// Spawn the actor seeded with `initial`. Must be called inside a tokio
    /// runtime. The actor stops when the last handle is dropped.
    pub fn spawn(initial: ContextMap, interactive: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = ContextStore {
            values: initial.into_iter().collect(),
            interactive,
            requests: Vec::new(),
            waiters: HashMap::new(),
        };
        tokio::spawn(store.run(rx));
        Self { tx }
    }

    /// Read a key. In interactive mode a missing key blocks until it is set.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.request_value(key, true).await
    }

    /// Read a key without ever blocking.
    pub async fn try_get(&self, key: &str) -> Result<Option<Value>> {
        self.request_value(key, false).await
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.send(Command::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub async fn remove(&self, key: &str) -> Result<Option<Value>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove {
            key: key.to_string(),
            reply,
        })?;
        recv(rx).await
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Keys { reply })?;
        recv(rx).await
    }

    /// Point-in-time copy of the whole map.
    pub async fn snapshot(&self) -> Result<ContextMap> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        recv(rx).await
    }

    pub async fn extend(&self, values: ContextMap) -> Result<()> {
        self.send(Command::Extend { values })
    }

    /// Drain the keys that interactive readers are waiting for.
    pub async fn take_requests(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TakeRequests { reply })?;
        recv(rx).await
    }

    /// Switching interactive mode off releases every waiting reader with `None`.
    pub async fn set_interactive(&self, interactive: bool) -> Result<()> {
        self.send(Command::SetInteractive { interactive })
    }

    async fn request_value(&self, key: &str, wait: bool) -> Result<Option<Value>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            key: key.to_string(),
            wait,
            reply,
        })?;
        recv(rx).await
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| DagrunError::Runtime("context store has shut down".to_string()))
    }
}

async fn recv<T>(rx: oneshot::Receiver<T>) -> Result<T> {
    rx.await
        .map_err(|_| DagrunError::Runtime("context store dropped a request".to_string()))
}

struct ContextStore {
    values: HashMap<String, Value>,
    interactive: bool,
    /// Keys requested by interactive readers, in request order.
    requests: Vec<String>,
    waiters: HashMap<String, Vec<oneshot::Sender<Option<Value>>>>,
}

impl ContextStore {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            self.apply(cmd);
        }
        trace!("context store stopped");
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Get { key, wait, reply } => match self.values.get(&key) {
                Some(v) => {
                    let _ = reply.send(Some(v.clone()));
                }
                None if wait && self.interactive => {
                    debug!(%key, "context key missing; waiting for interactive input");
                    if !self.requests.contains(&key) {
                        self.requests.push(key.clone());
                    }
                    self.waiters.entry(key).or_default().push(reply);
                }
                None => {
                    let _ = reply.send(None);
                }
            },
            Command::Set { key, value } => self.insert(key, value),
            Command::Remove { key, reply } => {
                let _ = reply.send(self.values.remove(&key));
            }
            Command::Keys { reply } => {
                let mut keys: Vec<String> = self.values.keys().cloned().collect();
                keys.sort();
                let _ = reply.send(keys);
            }
            Command::Snapshot { reply } => {
                let snapshot = self
                    .values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let _ = reply.send(snapshot);
            }
            Command::Extend { values } => {
                for (key, value) in values {
                    self.insert(key, value);
                }
            }
            Command::TakeRequests { reply } => {
                let _ = reply.send(std::mem::take(&mut self.requests));
            }
            Command::SetInteractive { interactive } => {
                self.interactive = interactive;
                if !interactive {
                    self.requests.clear();
                    for (_, waiters) in self.waiters.drain() {
                        for w in waiters {
                            let _ = w.send(None);
                        }
                    }
                }
            }
        }
    }

    fn insert(&mut self, key: String, value: Value) {
        if let Some(waiters) = self.waiters.remove(&key) {
            for w in waiters {
                let _ = w.send(Some(value.clone()));
            }
            self.requests.retain(|k| k != &key);
        }
        self.values.insert(key, value);
    }
}

/// Source of values for interactive context requests.
pub trait Prompter: Send {
    fn prompt<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Asks on the terminal: prompt on stderr, answer read from stdin.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        let key = key.to_string();
        Box::pin(async move {
            let line = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
                let mut stderr = std::io::stderr();
                write!(stderr, "Please provide a value for context key '{key}': ")?;
                stderr.flush()?;
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)?;
                Ok(line)
            })
            .await
            .map_err(|e| DagrunError::Runtime(format!("prompt task failed: {e}")))??;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
    }
}
