//! Seams to the editor's debug subsystem and the MCP server commands.
//!
//! Both are external collaborators: the core drives them through these
//! traits and never interprets what they do.

use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Debug-attach into the Client's extension host inspector port.
#[async_trait]
pub trait DebuggerControl: Send + Sync {
    async fn attach(&self, inspector_port: u16) -> Result<()>;

    /// Stop the active debug session, if any. Idempotent.
    async fn detach(&self) -> Result<()>;
}

/// Editor commands that stop, reset, and start the external MCP server.
#[async_trait]
pub trait McpServerControl: Send + Sync {
    async fn stop_server(&self) -> Result<()>;

    async fn reset_tool_cache(&self) -> Result<()>;

    async fn start_server(&self) -> Result<()>;
}

/// Logs attach/detach without a real debug session (headless embedders).
pub struct NullDebugger {
    attached_port: AtomicU16,
}

impl NullDebugger {
    pub fn new() -> Self {
        Self {
            attached_port: AtomicU16::new(0),
        }
    }

    pub fn attached_port(&self) -> Option<u16> {
        match self.attached_port.load(Ordering::Relaxed) {
            0 => None,
            port => Some(port),
        }
    }
}

impl Default for NullDebugger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DebuggerControl for NullDebugger {
    async fn attach(&self, inspector_port: u16) -> Result<()> {
        self.attached_port.store(inspector_port, Ordering::Relaxed);
        info!(inspector_port, "debugger attached");
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.attached_port.store(0, Ordering::Relaxed);
        info!("debugger detached");
        Ok(())
    }
}

/// Logs server-control commands (headless embedders).
pub struct NullMcpControl;

#[async_trait]
impl McpServerControl for NullMcpControl {
    async fn stop_server(&self) -> Result<()> {
        info!("mcp server stop requested");
        Ok(())
    }

    async fn reset_tool_cache(&self) -> Result<()> {
        info!("mcp tool cache reset requested");
        Ok(())
    }

    async fn start_server(&self) -> Result<()> {
        info!("mcp server start requested");
        Ok(())
    }
}

/// Records the command sequence for assertions.
#[derive(Clone, Default)]
pub struct RecordingMcpControl {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingMcpControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("call log poisoned").clone()
    }
}

#[async_trait]
impl McpServerControl for RecordingMcpControl {
    async fn stop_server(&self) -> Result<()> {
        self.calls.lock().expect("call log poisoned").push("stop");
        Ok(())
    }

    async fn reset_tool_cache(&self) -> Result<()> {
        self.calls.lock().expect("call log poisoned").push("reset");
        Ok(())
    }

    async fn start_server(&self) -> Result<()> {
        self.calls.lock().expect("call log poisoned").push("start");
        Ok(())
    }
}
