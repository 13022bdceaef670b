//! Line-delimited JSON-RPC server over a platform pipe.
//!
//! Every connection gets its own task; every request on a connection gets its
//! own task, so responses may complete out of order and callers correlate by
//! `id`. Parse errors and handler failures answer on the connection and never
//! tear the server down; only bind failure is fatal to `start`.

use crate::pipe::{PipeListener, PipeStream};
use crate::protocol::{
    decode_line, Decoded, RpcResponse, INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR, PING_METHOD,
};
use crate::registry::{HandlerRegistry, RpcHandler};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Running {
    path: PathBuf,
    accept_task: JoinHandle<()>,
}

pub struct PipeRpcServer {
    registry: Arc<RwLock<HandlerRegistry>>,
    running: Mutex<Option<Running>>,
}

impl PipeRpcServer {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(HandlerRegistry::new())),
            running: Mutex::new(None),
        }
    }

    /// Shared handler registry (for bulk installation).
    pub fn registry(&self) -> Arc<RwLock<HandlerRegistry>> {
        self.registry.clone()
    }

    pub async fn register_handler<H>(&self, method: impl Into<String>, handler: H)
    where
        H: RpcHandler,
        H::Input: 'static,
        H::Output: 'static,
    {
        self.registry.write().await.register(method, handler);
    }

    pub async fn unregister_handler(&self, method: &str) -> bool {
        self.registry.write().await.unregister(method)
    }

    /// Bind the pipe and start accepting. Fails with [`Error::AddrInUse`]
    /// when the name is already held.
    pub async fn start(&self, path: &Path) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Err(Error::AddrInUse(running.path.clone()));
        }

        let mut listener = PipeListener::bind(path).await?;
        info!(path = %path.display(), "pipe RPC server listening");

        let registry = self.registry.clone();
        let accept_path = path.to_path_buf();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(stream) => {
                        let registry = registry.clone();
                        tokio::spawn(run_connection(stream, registry));
                    }
                    Err(e) => {
                        warn!(path = %accept_path.display(), error = %e, "pipe accept failed");
                    }
                }
            }
        });

        *running = Some(Running {
            path: path.to_path_buf(),
            accept_task,
        });
        Ok(())
    }

    /// Close the listener. Responses in flight on already-open connections
    /// are best-effort only.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(running) = running.take() {
            running.accept_task.abort();
            // The listener is owned by the accept task; aborting drops it and
            // releases the pipe name.
            let _ = running.accept_task.await;
            info!(path = %running.path.display(), "pipe RPC server stopped");
        }
    }

    pub async fn socket_path(&self) -> Option<PathBuf> {
        self.running.lock().await.as_ref().map(|r| r.path.clone())
    }
}

impl Default for PipeRpcServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_connection(stream: PipeStream, registry: Arc<RwLock<HandlerRegistry>>) {
    let (read_half, write_half) = tokio::io::split(stream);
    let writer = Arc::new(Mutex::new(write_half));
    let alive = Arc::new(AtomicBool::new(true));

    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() != Some(&b'\n') {
                    // EOF mid-line: the remainder stays unprocessed.
                    break;
                }
                let line = String::from_utf8_lossy(&buf[..buf.len() - 1]).into_owned();
                if line.trim().is_empty() {
                    continue;
                }
                tokio::spawn(handle_line(
                    line,
                    registry.clone(),
                    writer.clone(),
                    alive.clone(),
                ));
            }
            Err(e) => {
                debug!(error = %e, "pipe connection read failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
}

async fn handle_line(
    line: String,
    registry: Arc<RwLock<HandlerRegistry>>,
    writer: Arc<Mutex<WriteHalf<PipeStream>>>,
    alive: Arc<AtomicBool>,
) {
    match decode_line(&line) {
        Decoded::ParseError => {
            let response = RpcResponse::error(Value::Null, PARSE_ERROR, "Parse error");
            write_response(&writer, &alive, response).await;
        }
        Decoded::MissingMethod { id } => {
            if let Some(id) = id {
                let response = RpcResponse::error(id, INVALID_REQUEST, "Invalid Request");
                write_response(&writer, &alive, response).await;
            } else {
                debug!("dropping id-less request without method");
            }
        }
        Decoded::Call { id, method, params } => {
            let outcome = dispatch_call(&registry, &method, params).await;
            match id {
                Some(id) => {
                    let response = match outcome {
                        Ok(result) => RpcResponse::result(id, result),
                        Err(Error::MethodNotFound(m)) => RpcResponse::error(
                            id,
                            METHOD_NOT_FOUND,
                            format!("Method not found: {}", m),
                        ),
                        Err(e) => RpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                    };
                    write_response(&writer, &alive, response).await;
                }
                None => {
                    // Fire-and-forget: the peer awaits nothing.
                    if let Err(e) = outcome {
                        debug!(method = %method, error = %e, "notification handler failed");
                    }
                }
            }
        }
    }
}

async fn dispatch_call(
    registry: &Arc<RwLock<HandlerRegistry>>,
    method: &str,
    params: Value,
) -> Result<Value> {
    if method == PING_METHOD {
        let names = registry.read().await.method_names();
        return Ok(json!({ "alive": true, "registeredMethods": names }));
    }

    // Clone the entry out so the registry lock is not held across the
    // handler's await points.
    let entry = registry.read().await.lookup(method);
    match entry {
        Some(handler) => handler.dispatch(params).await,
        None => Err(Error::MethodNotFound(method.to_string())),
    }
}

async fn write_response(
    writer: &Arc<Mutex<WriteHalf<PipeStream>>>,
    alive: &Arc<AtomicBool>,
    response: RpcResponse,
) {
    if !alive.load(Ordering::Acquire) {
        debug!("connection closed before response; dropping");
        return;
    }
    let line = response.to_line();
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        debug!(error = %e, "response write failed; marking connection dead");
        alive.store(false, Ordering::Release);
    }
}
