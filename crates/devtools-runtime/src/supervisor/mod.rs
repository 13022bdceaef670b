//! Host-side Client lifecycle supervision.
//!
//! One supervisor owns everything there is to know about the spawned Client:
//! the process handle (launcher and real PID), its ports, the persisted
//! session record, the reconnect single-flight, and the hot-reload-in-progress
//! flag. Handlers receive it as explicit context.

pub mod launch;
pub mod probe;

pub use launch::ClientProcess;

use crate::client::PipeRpcClient;
use crate::control::DebuggerControl;
use crate::osquery::{self, KillScope};
use crate::session::{SessionRecord, SessionStore};
use crate::{Error, Result};
use devtools_config::{client_pipe_path, mcp_pipe_path, LaunchOptions, WorkspacePaths};
use launch::SpawnSpec;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const INSPECTOR_ATTACH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SupervisorConfig {
    pub workspace: PathBuf,
    pub extension_path: PathBuf,
    pub editor_binary: String,
    pub launch_options: LaunchOptions,
    /// The pipe the spawned Client serves; injectable for tests.
    pub client_pipe: PathBuf,
    /// The external MCP server's control pipe.
    pub mcp_pipe: PathBuf,
}

impl SupervisorConfig {
    pub fn new(workspace: impl Into<PathBuf>, extension_path: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let mcp_pipe = mcp_pipe_path(&workspace);
        Self {
            workspace,
            extension_path: extension_path.into(),
            editor_binary: "code".to_string(),
            launch_options: LaunchOptions::default(),
            client_pipe: client_pipe_path(),
            mcp_pipe,
        }
    }
}

/// What `mcpReady` returns to the automation side.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientEndpoints {
    pub cdp_port: u16,
    pub user_data_dir: PathBuf,
    pub client_started_at: i64,
}

/// Diagnostic snapshot served by `getStatus`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub client_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspector_port: Option<u16>,
    pub hot_reload_in_progress: bool,
    pub session_persisted: bool,
    pub client_pipe: PathBuf,
}

pub struct ClientSupervisor {
    config: SupervisorConfig,
    paths: WorkspacePaths,
    sessions: SessionStore,
    debugger: Arc<dyn DebuggerControl>,
    http: reqwest::Client,
    client: Mutex<Option<ClientProcess>>,
    reconnect_gate: Mutex<()>,
    reconnect_generation: AtomicU64,
    hot_reload: AtomicBool,
}

impl ClientSupervisor {
    pub fn new(config: SupervisorConfig, debugger: Arc<dyn DebuggerControl>) -> Self {
        let paths = WorkspacePaths::new(&config.workspace);
        let sessions = SessionStore::new(&paths);
        Self {
            config,
            paths,
            sessions,
            debugger,
            http: reqwest::Client::new(),
            client: Mutex::new(None),
            reconnect_gate: Mutex::new(()),
            reconnect_generation: AtomicU64::new(0),
            hot_reload: AtomicBool::new(false),
        }
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn set_hot_reload_in_progress(&self, value: bool) {
        self.hot_reload.store(value, Ordering::SeqCst);
    }

    pub fn hot_reload_in_progress(&self) -> bool {
        self.hot_reload.load(Ordering::SeqCst)
    }

    /// The `mcpReady` entry point: reuse a healthy Client, adopt one left by
    /// a previous Host session, or spawn fresh.
    pub async fn ensure_client(&self, force_restart: bool) -> Result<ClientEndpoints> {
        if force_restart {
            self.stop_client().await?;
            probe::wait_for_pipe_release(&self.config.client_pipe).await?;
            return self.spawn_client().await;
        }

        if self.client.lock().await.is_some() {
            if self.health_check().await {
                let client = self.client.lock().await;
                let process = client.as_ref().expect("checked above");
                return Ok(self.endpoints_of(process));
            }
            // Dead by at least one probe: tear down and respawn.
            warn!("client failed health check; respawning");
            self.stop_client().await?;
            probe::wait_for_pipe_release(&self.config.client_pipe).await?;
            return self.spawn_client().await;
        }

        if let Some(adopted) = self.try_adopt_session().await {
            let endpoints = self.endpoints_of(&adopted);
            *self.client.lock().await = Some(adopted);
            info!(cdp_port = endpoints.cdp_port, "adopted client from session record");
            return Ok(endpoints);
        }

        self.spawn_client().await
    }

    /// The `hotReloadRequired` path: always a fresh window.
    pub async fn restart_client(&self) -> Result<ClientEndpoints> {
        self.stop_client().await?;
        probe::wait_for_pipe_release(&self.config.client_pipe).await?;
        self.spawn_client().await
    }

    /// Spawn, probe, discover the real PID, attach the debugger, persist.
    /// Any failure past the spawn tears the process back down so no
    /// half-ready Client or stale record survives.
    pub async fn spawn_client(&self) -> Result<ClientEndpoints> {
        let process = launch::spawn_editor(SpawnSpec {
            editor_binary: &self.config.editor_binary,
            workspace: &self.config.workspace,
            extension_path: &self.config.extension_path,
            user_data_dir: &self.paths.user_data_dir(),
            options: &self.config.launch_options,
        })
        .await?;

        match self.bring_up(process).await {
            Ok(endpoints) => Ok(endpoints),
            Err(e) => {
                self.sessions.clear().ok();
                Err(e)
            }
        }
    }

    async fn bring_up(&self, mut process: ClientProcess) -> Result<ClientEndpoints> {
        if let Err(e) =
            probe::wait_until_ready(&self.http, process.cdp_port, &self.config.client_pipe).await
        {
            process.stop().await;
            return Err(e);
        }

        if let Err(e) = process.discover_real_pid().await {
            process.stop().await;
            return Err(e);
        }

        if let Err(e) = self.attach_debugger(process.inspector_port).await {
            process.stop().await;
            return Err(e);
        }

        self.persist_session(&process)?;
        let endpoints = self.endpoints_of(&process);
        *self.client.lock().await = Some(process);
        Ok(endpoints)
    }

    async fn attach_debugger(&self, inspector_port: u16) -> Result<()> {
        probe::wait_for_inspector(inspector_port, INSPECTOR_ATTACH_TIMEOUT).await?;
        self.debugger.attach(inspector_port).await
    }

    /// Kill the Client tree, clear in-memory state, delete the session
    /// record. Kill errors are swallowed.
    pub async fn stop_client(&self) -> Result<()> {
        self.debugger.detach().await.ok();

        let taken = self.client.lock().await.take();
        match taken {
            Some(process) => process.stop().await,
            None => {
                // A record without an in-memory handle may still point at a
                // live process from a previous Host.
                if let Some(record) = self.sessions.load() {
                    if let Err(e) = osquery::kill_pid(record.pid, KillScope::Tree).await {
                        debug!(pid = record.pid, error = %e, "session-record kill failed");
                    }
                }
            }
        }
        self.sessions.clear()?;
        Ok(())
    }

    /// CDP answers, the pipe answers a real ping, and the PID is alive.
    pub async fn health_check(&self) -> bool {
        let (cdp_port, pid) = {
            let client = self.client.lock().await;
            match client.as_ref() {
                Some(process) => (process.cdp_port, process.effective_pid()),
                None => return false,
            }
        };
        probe::cdp_up(&self.http, cdp_port).await
            && probe::pipe_up(&self.config.client_pipe).await
            && osquery::pid_alive(pid).await
    }

    /// Reconnect after the Client reloads its extension host. Coalesced:
    /// callers that arrive while one reconnect runs wait for it and return.
    pub async fn reconnect(&self) -> Result<()> {
        if self.hot_reload_in_progress() {
            debug!("hot reload in progress; skipping reconnect");
            return Ok(());
        }
        let cdp_port = match self.client.lock().await.as_ref() {
            Some(process) => process.cdp_port,
            None => {
                debug!("no client to reconnect");
                return Ok(());
            }
        };
        if !probe::cdp_up(&self.http, cdp_port).await {
            debug!("CDP unreachable; reload is a real shutdown, not reconnecting");
            return Ok(());
        }

        let entry_generation = self.reconnect_generation.load(Ordering::SeqCst);
        let _gate = self.reconnect_gate.lock().await;
        if self.reconnect_generation.load(Ordering::SeqCst) != entry_generation {
            // Coalesced into the reconnect that just completed.
            return Ok(());
        }

        probe::wait_until_back(&self.http, cdp_port, &self.config.client_pipe).await?;

        let (pid, inspector_port) = {
            let mut client = self.client.lock().await;
            let process = client
                .as_mut()
                .ok_or_else(|| Error::Readiness("client vanished during reconnect".to_string()))?;
            // The extension-host reload can move the editor to a new PID.
            let pid = process.discover_real_pid().await?;
            (pid, process.inspector_port)
        };

        self.debugger.detach().await.ok();
        self.attach_debugger(inspector_port).await?;

        if let Some(process) = self.client.lock().await.as_ref() {
            self.persist_session(process)?;
        }

        let notifier = PipeRpcClient::new(&self.config.mcp_pipe);
        if let Err(e) = notifier.notify("client-reconnected", json!({})).await {
            debug!(error = %e, "mcp control pipe notification failed");
        }

        self.reconnect_generation.fetch_add(1, Ordering::SeqCst);
        info!(pid, cdp_port, "client reconnected");
        Ok(())
    }

    pub async fn status(&self) -> StatusSnapshot {
        let client = self.client.lock().await;
        let process = client.as_ref();
        StatusSnapshot {
            client_running: process.is_some(),
            launcher_pid: process.map(|p| p.launcher_pid()),
            real_pid: process.and_then(|p| p.real_pid()),
            cdp_port: process.map(|p| p.cdp_port),
            inspector_port: process.map(|p| p.inspector_port),
            hot_reload_in_progress: self.hot_reload_in_progress(),
            session_persisted: self.sessions.exists(),
            client_pipe: self.config.client_pipe.clone(),
        }
    }

    /// A persisted record whose process still answers all probes can be
    /// adopted instead of spawning a second window; anything less is an
    /// invalid record and gets cleared.
    async fn try_adopt_session(&self) -> Option<ClientProcess> {
        let record = self.sessions.load()?;
        let alive = osquery::pid_alive(record.pid).await
            && probe::cdp_up(&self.http, record.cdp_port).await
            && probe::pipe_up(&self.config.client_pipe).await;
        if !alive {
            debug!(pid = record.pid, "stale session record; clearing");
            self.sessions.clear().ok();
            return None;
        }
        Some(ClientProcess::from_session(
            record.pid,
            record.cdp_port,
            record.inspector_port,
            record.started_at,
        ))
    }

    fn persist_session(&self, process: &ClientProcess) -> Result<()> {
        self.sessions.save(&SessionRecord {
            pid: process.effective_pid(),
            cdp_port: process.cdp_port,
            inspector_port: process.inspector_port,
            extension_path: self.config.extension_path.clone(),
            started_at: process.started_at,
        })
    }

    fn endpoints_of(&self, process: &ClientProcess) -> ClientEndpoints {
        ClientEndpoints {
            cdp_port: process.cdp_port,
            user_data_dir: self.paths.user_data_dir(),
            client_started_at: process.started_at,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::control::NullDebugger;
    use crate::server::PipeRpcServer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn temp_pipe(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "devtools-supervisor-test-{}-{}.sock",
            name,
            std::process::id()
        ))
    }

    /// Minimal CDP stand-in: answers 200 to anything.
    async fn cdp_stub() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let body = r#"{"Browser":"Chrome/120.0.0.0","Protocol-Version":"1.3"}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        (port, task)
    }

    fn supervisor_in(
        dir: &std::path::Path,
        client_pipe: PathBuf,
    ) -> (ClientSupervisor, Arc<NullDebugger>) {
        let debugger = Arc::new(NullDebugger::new());
        let mut config = SupervisorConfig::new(dir, dir.join("ext"));
        config.editor_binary = "definitely-not-an-editor-binary".to_string();
        config.client_pipe = client_pipe;
        config.mcp_pipe = temp_pipe("mcp-nowhere");
        (
            ClientSupervisor::new(config, debugger.clone()),
            debugger,
        )
    }

    #[tokio::test]
    async fn test_health_check_without_client() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("health"));
        assert!(!supervisor.health_check().await);
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_and_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("spawn-fail"));

        let err = supervisor.spawn_client().await.unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
        assert!(!supervisor.status().await.session_persisted);
    }

    #[tokio::test]
    async fn test_adopt_session_with_live_probes() {
        let dir = tempfile::tempdir().unwrap();
        let client_pipe = temp_pipe("adopt");

        // Fake the Client: our own PID, a live CDP stub, a live pipe server.
        let (cdp_port, cdp_task) = cdp_stub().await;
        let pipe_server = PipeRpcServer::new();
        pipe_server.start(&client_pipe).await.unwrap();

        let (supervisor, debugger) = supervisor_in(dir.path(), client_pipe.clone());
        supervisor
            .sessions
            .save(&SessionRecord {
                pid: std::process::id(),
                cdp_port,
                inspector_port: cdp_port, // any accepting port works for attach
                extension_path: dir.path().join("ext"),
                started_at: 1_700_000_000_000,
            })
            .unwrap();

        let endpoints = supervisor.ensure_client(false).await.unwrap();
        assert_eq!(endpoints.cdp_port, cdp_port);
        assert_eq!(endpoints.client_started_at, 1_700_000_000_000);

        let status = supervisor.status().await;
        assert!(status.client_running);
        assert_eq!(status.real_pid, Some(std::process::id()));
        let _ = debugger;

        pipe_server.stop().await;
        cdp_task.abort();
    }

    #[tokio::test]
    async fn test_stale_session_record_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("stale"));

        // Dead PID and dead ports: the record is invalid.
        supervisor
            .sessions
            .save(&SessionRecord {
                pid: 3_999_999,
                cdp_port: 1,
                inspector_port: 1,
                extension_path: dir.path().join("ext"),
                started_at: 0,
            })
            .unwrap();

        assert!(supervisor.try_adopt_session().await.is_none());
        assert!(!supervisor.sessions.exists());
    }

    #[tokio::test]
    async fn test_stop_client_without_client_clears_record() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("stop-bare"));

        supervisor
            .sessions
            .save(&SessionRecord {
                pid: 3_999_999,
                cdp_port: 1,
                inspector_port: 1,
                extension_path: dir.path().join("ext"),
                started_at: 0,
            })
            .unwrap();

        supervisor.stop_client().await.unwrap();
        assert!(!supervisor.sessions.exists());
        // Idempotent.
        supervisor.stop_client().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_without_client_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("reconnect-noop"));
        supervisor.reconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_skipped_during_hot_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("reconnect-hot"));
        supervisor.set_hot_reload_in_progress(true);
        supervisor.reconnect().await.unwrap();
        assert!(supervisor.hot_reload_in_progress());
    }

    #[tokio::test]
    async fn test_reconnect_refreshes_session_and_debugger() {
        if !crate::osquery::lsof_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let client_pipe = temp_pipe("reconnect-full");

        let (cdp_port, cdp_task) = cdp_stub().await;
        let pipe_server = PipeRpcServer::new();
        pipe_server.start(&client_pipe).await.unwrap();

        let (supervisor, debugger) = supervisor_in(dir.path(), client_pipe.clone());
        supervisor
            .sessions
            .save(&SessionRecord {
                pid: std::process::id(),
                cdp_port,
                inspector_port: cdp_port,
                extension_path: dir.path().join("ext"),
                started_at: 1,
            })
            .unwrap();
        supervisor.ensure_client(false).await.unwrap();

        supervisor.reconnect().await.unwrap();
        assert_eq!(debugger.attached_port(), Some(cdp_port));

        let record = supervisor.sessions.load().unwrap();
        assert_eq!(record.pid, std::process::id());

        pipe_server.stop().await;
        cdp_task.abort();
    }

    #[tokio::test]
    async fn test_status_snapshot_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _) = supervisor_in(dir.path(), temp_pipe("status"));
        let status = supervisor.status().await;
        assert!(!status.client_running);
        assert!(!status.hot_reload_in_progress);
        assert!(!status.session_persisted);

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["clientRunning"], serde_json::json!(false));
        assert!(value.get("launcherPid").is_none());
    }
}
