//! Per-batch hot-reload orchestration.
//!
//! Called by the external MCP process at the start of each request batch.
//! Detect what changed by content hash, rebuild what must be rebuilt,
//! restart exactly what needs restarting: the Client window for extension
//! changes, the MCP server itself for server changes. The server-side
//! restart is deferred until the outgoing process drains its queue and calls
//! `readyToRestart`; the open progress notification is bridged across the
//! two RPCs.

pub mod build;
pub mod hash;

use crate::barrier::StatusBarrier;
use crate::control::McpServerControl;
use crate::progress::{ProgressSink, ProgressTask};
use crate::store::HashStore;
use crate::supervisor::{probe, ClientSupervisor};
use crate::Result;
use devtools_config::PackageRef;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The MCP notification closes by itself when `readyToRestart` never comes.
pub const BRIDGE_SAFETY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageOutcome {
    pub changed: bool,
    pub rebuilt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRestart {
    pub cdp_port: u16,
    pub client_started_at: i64,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub ext: PackageOutcome,
    pub mcp: PackageOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientRestart>,
}

#[derive(Debug, Clone)]
pub struct ChangeCheck {
    pub changed: bool,
    pub current_hash: String,
}

/// The open MCP notification plus its safety timer, parked between
/// `checkForChanges` and `readyToRestart`.
struct RestartBridge {
    task: Box<dyn ProgressTask>,
    safety: tokio::task::JoinHandle<()>,
}

pub struct HotReloadCoordinator {
    ext: PackageRef,
    mcp: PackageRef,
    store: Arc<dyn HashStore>,
    supervisor: Arc<ClientSupervisor>,
    progress: Arc<dyn ProgressSink>,
    barrier: Arc<StatusBarrier>,
    control: Arc<dyn McpServerControl>,
    bridge: Arc<Mutex<Option<RestartBridge>>>,
    restart_gate: Mutex<()>,
    restart_generation: AtomicU64,
}

impl HotReloadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ext: PackageRef,
        mcp: PackageRef,
        store: Arc<dyn HashStore>,
        supervisor: Arc<ClientSupervisor>,
        progress: Arc<dyn ProgressSink>,
        barrier: Arc<StatusBarrier>,
        control: Arc<dyn McpServerControl>,
    ) -> Self {
        Self {
            ext,
            mcp,
            store,
            supervisor,
            progress,
            barrier,
            control,
            bridge: Arc::new(Mutex::new(None)),
            restart_gate: Mutex::new(()),
            restart_generation: AtomicU64::new(0),
        }
    }

    pub fn barrier(&self) -> Arc<StatusBarrier> {
        self.barrier.clone()
    }

    /// Hash a package and compare against the stored value.
    pub async fn detect_change(&self, package: &PackageRef) -> Result<ChangeCheck> {
        let current = hash::hash_package(&package.dir).await?;
        let stored = self.store.get(package.role.key()).await?;
        Ok(ChangeCheck {
            changed: stored.as_deref() != Some(current.hash.as_str()),
            current_hash: current.hash,
        })
    }

    /// The per-batch entry point. With no source edits this is a pure read:
    /// no builds, no restarts, an all-false result.
    pub async fn check_for_changes(&self) -> Result<CheckResult> {
        let ext_check = self.detect_change(&self.ext).await?;
        let mcp_check = self.detect_change(&self.mcp).await?;

        let mut result = CheckResult {
            ext: PackageOutcome {
                changed: ext_check.changed,
                ..Default::default()
            },
            mcp: PackageOutcome {
                changed: mcp_check.changed,
                ..Default::default()
            },
            client: None,
        };

        if !ext_check.changed && !mcp_check.changed {
            return Ok(result);
        }

        self.supervisor.set_hot_reload_in_progress(true);
        let outcome = self
            .run_reload(&ext_check, &mcp_check, &mut result)
            .await;
        self.supervisor.set_hot_reload_in_progress(false);
        outcome?;
        Ok(result)
    }

    async fn run_reload(
        &self,
        ext_check: &ChangeCheck,
        mcp_check: &ChangeCheck,
        result: &mut CheckResult,
    ) -> Result<()> {
        if ext_check.changed {
            self.reload_extension(ext_check, result).await?;
        }
        if mcp_check.changed {
            self.rebuild_mcp(mcp_check, result).await?;
        }
        Ok(())
    }

    /// Extension path: rebuild, bounce the Client window, report the new
    /// endpoints back to the caller.
    async fn reload_extension(&self, check: &ChangeCheck, result: &mut CheckResult) -> Result<()> {
        let task = self.progress.begin("Extension");
        let outcome = self.drive_extension(task.as_ref(), check, result).await;
        if let Err(ref e) = outcome {
            task.finish(&format!("Failed: {}", e));
        }
        outcome
    }

    async fn drive_extension(
        &self,
        task: &dyn ProgressTask,
        check: &ChangeCheck,
        result: &mut CheckResult,
    ) -> Result<()> {
        task.report("Rebuilding…");

        if let Some(diagnostic) = build::run_build(&self.ext.dir, &self.ext.build_script).await? {
            warn!("extension build failed");
            task.finish("Build failed");
            result.ext.build_error = Some(diagnostic);
            return Ok(());
        }
        result.ext.rebuilt = true;
        // The hash is only committed once the artifact exists.
        self.store
            .set(self.ext.role.key(), check.current_hash.clone())
            .await?;

        task.report("Stopping client window…");
        self.supervisor.stop_client().await?;
        probe::wait_for_pipe_release(&self.supervisor.config().client_pipe).await?;

        task.report("Launching client window…");
        let endpoints = self.supervisor.spawn_client().await?;
        task.finish("Client reconnected ✅");

        result.client = Some(ClientRestart {
            cdp_port: endpoints.cdp_port,
            client_started_at: endpoints.client_started_at,
        });
        Ok(())
    }

    /// MCP path: rebuild now, defer the restart until the outgoing server
    /// drains its queue. The notification stays open on the bridge and the
    /// status barrier closes.
    async fn rebuild_mcp(&self, check: &ChangeCheck, result: &mut CheckResult) -> Result<()> {
        let task = self.progress.begin("MCP Server");
        task.report("Rebuilding…");

        if let Some(diagnostic) = build::run_build(&self.mcp.dir, &self.mcp.build_script).await? {
            warn!("mcp server build failed");
            task.finish("Build failed");
            result.mcp.build_error = Some(diagnostic);
            return Ok(());
        }
        result.mcp.rebuilt = true;
        if let Err(e) = self
            .store
            .set(self.mcp.role.key(), check.current_hash.clone())
            .await
        {
            task.finish(&format!("Failed: {}", e));
            return Err(e);
        }

        task.report("Rebuilt ✓ — restarting…");
        self.barrier.expect_restart();
        self.park_bridge(task).await;
        Ok(())
    }

    async fn park_bridge(&self, task: Box<dyn ProgressTask>) {
        let mut bridge = self.bridge.lock().await;
        // A previous bridge that was never driven closes now.
        if let Some(stale) = bridge.take() {
            stale.safety.abort();
            stale.task.finish("Superseded");
        }

        let bridge_ref = self.bridge.clone();
        let safety = tokio::spawn(async move {
            tokio::time::sleep(BRIDGE_SAFETY_TIMEOUT).await;
            let mut bridge = bridge_ref.lock().await;
            if let Some(bridge) = bridge.take() {
                warn!("readyToRestart never arrived; closing notification");
                bridge.task.finish("Restarted");
            }
        });

        *bridge = Some(RestartBridge { task, safety });
    }

    /// Called by the outgoing MCP server once its queue is drained. Drives
    /// the parked notification through stop/reset/start. Single-flight: a
    /// second call during the first awaits its completion and returns.
    pub async fn ready_to_restart(&self) -> Result<()> {
        let entry_generation = self.restart_generation.load(Ordering::SeqCst);
        let _gate = self.restart_gate.lock().await;
        if self.restart_generation.load(Ordering::SeqCst) != entry_generation {
            return Ok(());
        }

        let bridge = {
            let mut bridge = self.bridge.lock().await;
            bridge.take()
        };
        if let Some(ref bridge) = bridge {
            bridge.safety.abort();
        }

        let report = |message: &str| {
            if let Some(ref bridge) = bridge {
                bridge.task.report(message);
            }
        };

        report("Stopping…");
        self.control.stop_server().await?;
        report("Clearing tool cache…");
        self.control.reset_tool_cache().await?;
        report("Starting…");
        self.control.start_server().await?;

        if let Some(bridge) = bridge {
            bridge.task.finish("✅ Restarted");
        }
        self.restart_generation.fetch_add(1, Ordering::SeqCst);
        info!("mcp server restart cycle complete");
        Ok(())
    }

    /// The new MCP server announced itself; open the barrier.
    pub fn signal_mcp_ready(&self) {
        self.barrier.signal_ready();
    }
}
