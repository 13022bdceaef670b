use anyhow::{Context, Result};
use devtools_config::{parse_host_config, PackageRef, PackageRole, WorkspacePaths};
use devtools_runtime::{
    claim_role, install_client_handlers, install_host_handlers, ClientSupervisor,
    HotReloadCoordinator, NullDebugger, NullMcpControl, PipeRpcServer, ProcessLedger, Role,
    SledHashStore, StatusBarrier, SupervisorConfig, TracingProgress,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub async fn execute(
    workspace: &str,
    extension: Option<&str>,
    mcp: Option<&str>,
    editor_bin: &str,
) -> Result<()> {
    let workspace = std::fs::canonicalize(workspace)
        .with_context(|| format!("workspace not found: {}", workspace))?;

    let server = PipeRpcServer::new();
    let role = match claim_role(&server).await {
        Ok(role) => role,
        Err(e) if matches!(e, devtools_runtime::Error::SessionConflict) => {
            // Both pipes are held by other processes. Takeover is not
            // supported; the only options are waiting or stopping the
            // other session.
            error!("another devtools session already owns this machine's pipes");
            anyhow::bail!("session conflict: host and client pipes are both in use");
        }
        Err(e) => return Err(e).context("role arbitration failed"),
    };

    info!(%role, "activated");

    match role {
        Role::Host => serve_host(&server, &workspace, extension, mcp, editor_bin).await?,
        Role::Client => serve_client(&server, &workspace).await?,
    }

    tokio::signal::ctrl_c().await.context("signal wait failed")?;
    info!("shutting down");

    if role == Role::Client {
        // Fire-and-forget, exactly like the editor extension does before a
        // reload; a Host that misses it falls back to CDP probing.
        let host = devtools_runtime::PipeRpcClient::new(devtools_config::host_pipe_path());
        if let Err(e) = host
            .notify("clientShuttingDown", serde_json::json!({}))
            .await
        {
            warn!(error = %e, "host did not take the shutdown notification");
        }
    }

    server.stop().await;
    Ok(())
}

async fn serve_host(
    server: &PipeRpcServer,
    workspace: &Path,
    extension: Option<&str>,
    mcp: Option<&str>,
    editor_bin: &str,
) -> Result<()> {
    let host_config = parse_host_config(&WorkspacePaths::new(workspace).host_config())
        .context("host.config.jsonc unreadable")?;
    if let Some(subroot) = &host_config.workspace_subroot {
        info!(%subroot, "workspace subroot configured");
    }

    let extension_dir = resolve_package(workspace, extension, "packages/extension");
    let mcp_dir = resolve_package(workspace, mcp, "packages/mcp-server");

    let mut config = SupervisorConfig::new(workspace, &extension_dir);
    config.editor_binary = editor_bin.to_string();
    let supervisor = Arc::new(ClientSupervisor::new(config, Arc::new(NullDebugger::new())));

    // Host handlers are the "domain" surface here; if wiring them fails the
    // pipe server stays up so system.ping keeps answering (safe mode).
    match build_coordinator(&supervisor, &extension_dir, &mcp_dir) {
        Ok(coordinator) => {
            install_host_handlers(server, supervisor, coordinator).await;
            info!("host handlers installed");
        }
        Err(e) => {
            warn!(error = %e, "host handlers failed to load; running in safe mode");
        }
    }
    Ok(())
}

fn build_coordinator(
    supervisor: &Arc<ClientSupervisor>,
    extension_dir: &Path,
    mcp_dir: &Path,
) -> Result<Arc<HotReloadCoordinator>> {
    let store = SledHashStore::open(&supervisor.paths().hash_store())
        .context("hash store unavailable")?;
    Ok(Arc::new(HotReloadCoordinator::new(
        PackageRef::new(PackageRole::Ext, extension_dir),
        PackageRef::new(PackageRole::Mcp, mcp_dir),
        Arc::new(store),
        supervisor.clone(),
        Arc::new(TracingProgress),
        Arc::new(StatusBarrier::new()),
        Arc::new(NullMcpControl),
    )))
}

async fn serve_client(server: &PipeRpcServer, workspace: &Path) -> Result<()> {
    let ledger = Arc::new(ProcessLedger::new(WorkspacePaths::new(workspace)));
    ledger
        .initialize()
        .await
        .context("process ledger initialization failed")?;
    install_client_handlers(server, ledger).await;
    info!("client handlers installed");
    Ok(())
}

fn resolve_package(workspace: &Path, explicit: Option<&str>, conventional: &str) -> PathBuf {
    match explicit {
        Some(path) => {
            let path = PathBuf::from(path);
            if path.is_absolute() {
                path
            } else {
                workspace.join(path)
            }
        }
        None => workspace.join(conventional),
    }
}
