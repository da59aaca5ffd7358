// src/context/client.rs

//! Blocking client for the context socket, used by `dagrun ctx` and by any
//! Rust worker process that wants shared values.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde_json::Value;

use crate::context::SOCKET_ENV;
use crate::context::server::{ContextRequest, ContextResponse};
use crate::errors::{DagrunError, Result};

pub struct ContextClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl ContextClient {
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Connect to the socket named by `DAGRUN_CONTEXT_SOCKET`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(SOCKET_ENV).ok_or_else(|| {
            DagrunError::Config(format!("{SOCKET_ENV} is not set; not running under dagrun?"))
        })?;
        Self::connect(Path::new(&path))
    }

    pub fn get(&mut self, key: &str) -> Result<Option<Value>> {
        self.call(&ContextRequest::Get {
            key: key.to_string(),
        })
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.call(&ContextRequest::Set {
            key: key.to_string(),
            value,
        })
        .map(|_| ())
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        self.call(&ContextRequest::Remove {
            key: key.to_string(),
        })
    }

    pub fn keys(&mut self) -> Result<Vec<String>> {
        let value = self.call(&ContextRequest::Keys)?.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    fn call(&mut self, request: &ContextRequest) -> Result<Option<Value>> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(DagrunError::Runtime(
                "context server closed the connection".to_string(),
            ));
        }
        let response: ContextResponse = serde_json::from_str(&reply)?;
        if response.ok {
            Ok(response.value)
        } else {
            Err(DagrunError::Runtime(
                response
                    .error
                    .unwrap_or_else(|| "context request failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::server::ContextServer;
    use crate::context::{ContextHandle, ContextMap};
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn client_round_trips_through_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join(".job.ctx.sock");

        let ctx = ContextHandle::spawn(ContextMap::new(), false);
        let server = ContextServer::start(&sock, ctx.clone()).unwrap();

        let path = sock.clone();
        let seen = tokio::task::spawn_blocking(move || {
            let mut client = ContextClient::connect(&path).unwrap();
            client.set("rows", json!(120)).unwrap();
            let rows = client.get("rows").unwrap();
            let keys = client.keys().unwrap();
            let missing = client.get("nope").unwrap();
            (rows, keys, missing)
        })
        .await
        .unwrap();

        assert_eq!(seen.0, Some(json!(120)));
        assert_eq!(seen.1, vec!["rows".to_string()]);
        assert_eq!(seen.2, None);
        assert_eq!(ctx.try_get("rows").await.unwrap(), Some(json!(120)));

        server.shutdown().await;
        assert!(!sock.exists());
    }
}
