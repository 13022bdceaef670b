//! Pipe-side RPC caller: one connection per request, correlation by `id`.

use crate::pipe;
use crate::protocol::{request_line, PING_METHOD};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// What `system.ping` answers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReply {
    pub alive: bool,
    pub registered_methods: Vec<String>,
}

pub struct PipeRpcClient {
    path: PathBuf,
    next_id: AtomicU64,
}

impl PipeRpcClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call a method and await its response, bounded by `timeout`.
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        tokio::time::timeout(timeout, self.request_inner(method, params))
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn request_inner(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut stream = pipe::connect(&self.path).await?;
        stream
            .write_all(request_line(Some(id), method, &params).as_bytes())
            .await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                )));
            }
            let value: Value = match serde_json::from_str(line.trim_end()) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = value.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown remote error");
                return Err(Error::Handler(message.to_string()));
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Fire-and-forget: no `id`, no response awaited.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let mut stream = pipe::connect(&self.path).await?;
        stream
            .write_all(request_line(None, method, &params).as_bytes())
            .await?;
        stream.flush().await?;
        Ok(())
    }

    /// A real round-trip over the pipe, not just a connect.
    pub async fn ping(&self, timeout: Duration) -> Result<PingReply> {
        let value = self
            .request(PING_METHOD, Value::Object(Default::default()), timeout)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}
