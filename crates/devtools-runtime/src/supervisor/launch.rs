//! Spawning the Client editor process.
//!
//! The spawned binary may be a launcher stub (notably on Windows) that forks
//! the real editor and exits with a benign code, so the PID returned by the
//! OS at spawn time is only provisional. The authoritative PID is whatever
//! ends up listening on the CDP port.

use crate::osquery::{self, KillOutcome, KillScope};
use crate::{Error, Result};
use devtools_config::LaunchOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Environment prefixes and flags that would make the child re-enter the
/// parent's IPC or come up as a bare node process instead of an editor.
const SCRUBBED_ENV_PREFIX: &str = "VSCODE_";
const SCRUBBED_ENV_FLAGS: [&str; 2] = ["ELECTRON_RUN_AS_NODE", "ELECTRON_NO_ATTACH_CONSOLE"];

/// Grab a free loopback TCP port by binding an ephemeral listener.
pub fn allocate_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Full argument list for the editor binary. The workspace path goes last as
/// a positional.
pub fn assemble_args(
    extension_path: &Path,
    cdp_port: u16,
    inspector_port: u16,
    user_data_dir: &Path,
    options: &LaunchOptions,
    workspace: &Path,
) -> Vec<String> {
    let mut args = vec![
        format!("--extensionDevelopmentPath={}", extension_path.display()),
        format!("--remote-debugging-port={}", cdp_port),
        format!("--inspect-extensions={}", inspector_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--new-window".to_string(),
        "--no-sandbox".to_string(),
        "--disable-gpu-sandbox".to_string(),
    ];
    args.extend(options.to_args());
    args.push(workspace.display().to_string());
    args
}

/// The inherited environment minus everything that would confuse the child.
pub fn scrubbed_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(key, _)| {
            !key.starts_with(SCRUBBED_ENV_PREFIX) && !SCRUBBED_ENV_FLAGS.contains(&key.as_str())
        })
        .collect()
}

/// The spawned Client as an opaque handle: launcher PID and real PID are
/// tracked separately, and `stop` kills whichever tree is actually alive.
#[derive(Debug)]
pub struct ClientProcess {
    launcher_pid: u32,
    real_pid: Option<u32>,
    pub cdp_port: u16,
    pub inspector_port: u16,
    /// Milliseconds since the epoch.
    pub started_at: i64,
}

impl ClientProcess {
    /// The PID worth acting on: the real editor once discovered, the
    /// launcher until then.
    pub fn effective_pid(&self) -> u32 {
        self.real_pid.unwrap_or(self.launcher_pid)
    }

    pub fn launcher_pid(&self) -> u32 {
        self.launcher_pid
    }

    pub fn real_pid(&self) -> Option<u32> {
        self.real_pid
    }

    /// Rebuild a handle from a persisted session record (reconnect path).
    pub fn from_session(pid: u32, cdp_port: u16, inspector_port: u16, started_at: i64) -> Self {
        Self {
            launcher_pid: pid,
            real_pid: Some(pid),
            cdp_port,
            inspector_port,
            started_at,
        }
    }

    /// Ask the OS who owns the CDP port and adopt that as the real PID.
    pub async fn discover_real_pid(&mut self) -> Result<u32> {
        match osquery::pid_listening_on_port(self.cdp_port).await? {
            Some(pid) => {
                if self.real_pid != Some(pid) {
                    info!(
                        launcher_pid = self.launcher_pid,
                        real_pid = pid,
                        cdp_port = self.cdp_port,
                        "discovered real editor PID"
                    );
                }
                self.real_pid = Some(pid);
                Ok(pid)
            }
            None => Err(Error::Spawn(format!(
                "no process listening on CDP port {}",
                self.cdp_port
            ))),
        }
    }

    /// Kill the whole tree: real PID first, then the launcher if distinct.
    /// Kill failures are swallowed; this is best-effort cleanup.
    pub async fn stop(&self) {
        let effective = self.effective_pid();
        match osquery::kill_pid(effective, KillScope::Tree).await {
            Ok(KillOutcome::Killed) => debug!(pid = effective, "killed client tree"),
            Ok(KillOutcome::AlreadyGone) => debug!(pid = effective, "client already gone"),
            Err(e) => warn!(pid = effective, error = %e, "client kill failed"),
        }
        if self.launcher_pid != effective {
            if let Err(e) = osquery::kill_pid(self.launcher_pid, KillScope::Process).await {
                debug!(pid = self.launcher_pid, error = %e, "launcher kill failed");
            }
        }
    }
}

pub struct SpawnSpec<'a> {
    pub editor_binary: &'a str,
    pub workspace: &'a Path,
    pub extension_path: &'a Path,
    pub user_data_dir: &'a PathBuf,
    pub options: &'a LaunchOptions,
}

/// Launch the editor detached: stdin/stdout ignored, stderr drained into the
/// log. Returns once the OS has a PID; readiness is probed separately.
pub async fn spawn_editor(spec: SpawnSpec<'_>) -> Result<ClientProcess> {
    let cdp_port = allocate_port()?;
    let inspector_port = allocate_port()?;

    std::fs::create_dir_all(spec.user_data_dir)?;

    let args = assemble_args(
        spec.extension_path,
        cdp_port,
        inspector_port,
        spec.user_data_dir,
        spec.options,
        spec.workspace,
    );
    debug!(binary = spec.editor_binary, ?args, "spawning client editor");

    let mut child = Command::new(spec.editor_binary)
        .args(&args)
        .env_clear()
        .envs(scrubbed_env())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Spawn(format!("{}: {}", spec.editor_binary, e)))?;

    let launcher_pid = child
        .id()
        .ok_or_else(|| Error::Spawn("no PID returned by the OS".to_string()))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "client_stderr", "{}", line);
            }
        });
    }

    // Reap in the background. A launcher stub exits almost immediately with
    // a benign code; that is not a spawn failure.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => debug!(launcher_pid, %status, "launcher process exited"),
            Err(e) => debug!(launcher_pid, error = %e, "launcher wait failed"),
        }
    });

    info!(launcher_pid, cdp_port, inspector_port, "client editor spawned");

    Ok(ClientProcess {
        launcher_pid,
        real_pid: None,
        cdp_port,
        inspector_port,
        started_at: chrono::Utc::now().timestamp_millis(),
    })
}
