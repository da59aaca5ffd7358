// src/context/server.rs

//! Unix-socket front end for the context actor.
//!
//! Protocol: one JSON object per line in each direction.
//!
//! ```text
//! -> {"op":"set","key":"rows","value":120}
//! <- {"ok":true}
//! -> {"op":"get","key":"rows"}
//! <- {"ok":true,"value":120}
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::ContextHandle;
use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ContextRequest {
    Get { key: String },
    Set { key: String, value: Value },
    Remove { key: String },
    Keys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContextResponse {
    fn ok(value: Option<Value>) -> Self {
        Self {
            ok: true,
            value,
            error: None,
        }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(msg.into()),
        }
    }
}

/// Serves a [`ContextHandle`] on a Unix socket until shut down or dropped.
pub struct ContextServer {
    path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ContextServer {
    /// Bind `path` (replacing a stale socket file) and start accepting.
    pub fn start(path: &Path, ctx: ContextHandle) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(socket = %path.display(), "serving context");

        let task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));
        Ok(Self {
            path: path.to_path_buf(),
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting, close open connections and remove the socket file.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ContextServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(socket = %self.path.display(), error = %e, "failed to remove context socket");
            }
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    ctx: ContextHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(stream, ctx.clone(), shutdown_rx.clone()));
                }
                Err(e) => warn!(error = %e, "failed to accept context connection"),
            },
            _ = shutdown_rx.changed() => {
                debug!("context server shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    ctx: ContextHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown_rx.changed() => break,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "context connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ContextRequest>(&line) {
            Ok(request) => dispatch(&ctx, request).await,
            Err(e) => ContextResponse::err(format!("malformed request: {e}")),
        };

        let mut out = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to encode context response");
                break;
            }
        };
        out.push('\n');
        if writer.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn dispatch(ctx: &ContextHandle, request: ContextRequest) -> ContextResponse {
    let result = match request {
        ContextRequest::Get { key } => ctx.get(&key).await,
        ContextRequest::Set { key, value } => ctx.set(key, value).await.map(|()| None),
        ContextRequest::Remove { key } => ctx.remove(&key).await,
        ContextRequest::Keys => ctx
            .keys()
            .await
            .map(|keys| Some(Value::from(keys))),
    };
    match result {
        Ok(value) => ContextResponse::ok(value),
        Err(e) => ContextResponse::err(e.to_string()),
    }
}
