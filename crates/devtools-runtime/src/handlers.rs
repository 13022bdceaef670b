//! The core's own RPC methods.
//!
//! Each method is a typed handler over an explicit params struct; the
//! registry deserializes at the boundary so handlers never pick fields out
//! of loose JSON. Domain methods (terminal control, file editing, code
//! intelligence) are registered by their own consumers and are not here.

use crate::hotreload::{CheckResult, HotReloadCoordinator};
use crate::ledger::{KillOrphansOutcome, LedgerSummary, ProcessLedger};
use crate::server::PipeRpcServer;
use crate::supervisor::{ClientEndpoints, ClientSupervisor, StatusSnapshot};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Accepts and ignores any payload; for methods that take no params.
#[derive(Debug, Default, Deserialize)]
pub struct EmptyParams {
    #[serde(flatten)]
    _rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpReadyParams {
    #[serde(default)]
    pub force_restart: bool,
}

/// `mcpReady`: the new MCP server is up. Opens the status barrier and
/// ensures a healthy Client exists (spawning or reconnecting as needed).
pub struct McpReadyHandler {
    pub supervisor: Arc<ClientSupervisor>,
    pub coordinator: Arc<HotReloadCoordinator>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for McpReadyHandler {
    type Input = McpReadyParams;
    type Output = ClientEndpoints;
    type Error = Error;

    async fn handle(&self, input: Self::Input) -> Result<Self::Output> {
        self.coordinator.signal_mcp_ready();
        self.supervisor.ensure_client(input.force_restart).await
    }
}

/// `hotReloadRequired`: stop the Client, wait for the pipe name, respawn.
pub struct HotReloadRequiredHandler {
    pub supervisor: Arc<ClientSupervisor>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for HotReloadRequiredHandler {
    type Input = EmptyParams;
    type Output = ClientEndpoints;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        self.supervisor.restart_client().await
    }
}

/// `clientShuttingDown`: notification from the Client ahead of an
/// extension-host reload. The reconnect runs in the background; the sender
/// does not await us.
pub struct ClientShuttingDownHandler {
    pub supervisor: Arc<ClientSupervisor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledged {
    pub acknowledged: bool,
}

#[async_trait::async_trait]
impl crate::RpcHandler for ClientShuttingDownHandler {
    type Input = EmptyParams;
    type Output = Acknowledged;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        info!("client announced shutdown; scheduling reconnect");
        let supervisor = self.supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.reconnect().await {
                tracing::warn!(error = %e, "reconnect after client shutdown failed");
            }
        });
        Ok(Acknowledged { acknowledged: true })
    }
}

/// `getStatus`: diagnostic snapshot of PIDs, ports, and in-flight flags.
pub struct GetStatusHandler {
    pub supervisor: Arc<ClientSupervisor>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for GetStatusHandler {
    type Input = EmptyParams;
    type Output = StatusSnapshot;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        Ok(self.supervisor.status().await)
    }
}

/// `takeover`: another would-be Host is asking for control. Not supported;
/// the answer says so instead of advertising a dead dialog button.
pub struct TakeoverHandler;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoverReply {
    pub accepted: bool,
    pub reason: String,
}

#[async_trait::async_trait]
impl crate::RpcHandler for TakeoverHandler {
    type Input = EmptyParams;
    type Output = TakeoverReply;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        Ok(TakeoverReply {
            accepted: false,
            reason: "session takeover is not supported; stop the other host first".to_string(),
        })
    }
}

/// `teardown`: graceful shutdown of the Client and the debug session.
pub struct TeardownHandler {
    pub supervisor: Arc<ClientSupervisor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownReply {
    pub stopped: bool,
}

#[async_trait::async_trait]
impl crate::RpcHandler for TeardownHandler {
    type Input = EmptyParams;
    type Output = TeardownReply;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        self.supervisor.stop_client().await?;
        Ok(TeardownReply { stopped: true })
    }
}

/// `checkForChanges`: the per-batch hot-reload entry point.
pub struct CheckForChangesHandler {
    pub coordinator: Arc<HotReloadCoordinator>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for CheckForChangesHandler {
    type Input = EmptyParams;
    type Output = CheckResult;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        self.coordinator.check_for_changes().await
    }
}

/// `readyToRestart`: the outgoing MCP server drained its queue.
pub struct ReadyToRestartHandler {
    pub coordinator: Arc<HotReloadCoordinator>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartedReply {
    pub restarted: bool,
}

#[async_trait::async_trait]
impl crate::RpcHandler for ReadyToRestartHandler {
    type Input = EmptyParams;
    type Output = RestartedReply;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        self.coordinator.ready_to_restart().await?;
        Ok(RestartedReply { restarted: true })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpStatusParams {
    #[serde(default = "default_status_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_status_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpStatusReply {
    pub ready: bool,
}

/// `mcpStatus`: block until any pending server restart completes, bounded
/// by the caller's timeout. Callers may poll.
pub struct McpStatusHandler {
    pub coordinator: Arc<HotReloadCoordinator>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for McpStatusHandler {
    type Input = McpStatusParams;
    type Output = McpStatusReply;
    type Error = Error;

    async fn handle(&self, input: Self::Input) -> Result<Self::Output> {
        let ready = self
            .coordinator
            .barrier()
            .wait_for_ready(Duration::from_millis(input.timeout_ms))
            .await;
        Ok(McpStatusReply { ready })
    }
}

/// `system.getProcessLedger` (Client side): summary with refreshed
/// descendants.
pub struct GetProcessLedgerHandler {
    pub ledger: Arc<ProcessLedger>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for GetProcessLedgerHandler {
    type Input = EmptyParams;
    type Output = LedgerSummary;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        self.ledger.refresh_active_children().await?;
        self.ledger.summary().await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKillParams {
    pub pid: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKillReply {
    pub killed: bool,
}

/// `process.kill` (Client side).
pub struct ProcessKillHandler {
    pub ledger: Arc<ProcessLedger>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for ProcessKillHandler {
    type Input = ProcessKillParams;
    type Output = ProcessKillReply;
    type Error = Error;

    async fn handle(&self, input: Self::Input) -> Result<Self::Output> {
        self.ledger.kill(input.pid).await?;
        Ok(ProcessKillReply { killed: true })
    }
}

/// `process.killOrphans` (Client side).
pub struct KillOrphansHandler {
    pub ledger: Arc<ProcessLedger>,
}

#[async_trait::async_trait]
impl crate::RpcHandler for KillOrphansHandler {
    type Input = EmptyParams;
    type Output = KillOrphansOutcome;
    type Error = Error;

    async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
        self.ledger.kill_orphans().await
    }
}

/// Register the Host's method set onto a running pipe server.
pub async fn install_host_handlers(
    server: &PipeRpcServer,
    supervisor: Arc<ClientSupervisor>,
    coordinator: Arc<HotReloadCoordinator>,
) {
    server
        .register_handler(
            "mcpReady",
            McpReadyHandler {
                supervisor: supervisor.clone(),
                coordinator: coordinator.clone(),
            },
        )
        .await;
    server
        .register_handler(
            "hotReloadRequired",
            HotReloadRequiredHandler {
                supervisor: supervisor.clone(),
            },
        )
        .await;
    server
        .register_handler(
            "clientShuttingDown",
            ClientShuttingDownHandler {
                supervisor: supervisor.clone(),
            },
        )
        .await;
    server
        .register_handler(
            "getStatus",
            GetStatusHandler {
                supervisor: supervisor.clone(),
            },
        )
        .await;
    server.register_handler("takeover", TakeoverHandler).await;
    server
        .register_handler(
            "teardown",
            TeardownHandler {
                supervisor: supervisor.clone(),
            },
        )
        .await;
    server
        .register_handler(
            "checkForChanges",
            CheckForChangesHandler {
                coordinator: coordinator.clone(),
            },
        )
        .await;
    server
        .register_handler(
            "readyToRestart",
            ReadyToRestartHandler {
                coordinator: coordinator.clone(),
            },
        )
        .await;
    server
        .register_handler("mcpStatus", McpStatusHandler { coordinator })
        .await;
}

/// Register the Client's method set onto a running pipe server.
pub async fn install_client_handlers(server: &PipeRpcServer, ledger: Arc<ProcessLedger>) {
    server
        .register_handler(
            "system.getProcessLedger",
            GetProcessLedgerHandler {
                ledger: ledger.clone(),
            },
        )
        .await;
    server
        .register_handler(
            "process.kill",
            ProcessKillHandler {
                ledger: ledger.clone(),
            },
        )
        .await;
    server
        .register_handler("process.killOrphans", KillOrphansHandler { ledger })
        .await;
}
