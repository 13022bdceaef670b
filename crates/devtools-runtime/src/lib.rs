//! # devtools-runtime
//!
//! Lifecycle, IPC, and hot-reload engine for the vscode-devtools
//! orchestration system: a Host process that supervises a disposable Client
//! editor window on behalf of an external MCP automation peer.
//!
//! The pieces, leaves first:
//!
//! - **Pipe RPC server** ([`PipeRpcServer`]): newline-delimited JSON-RPC 2.0
//!   over a platform pipe with a pluggable handler registry and a built-in
//!   `system.ping`.
//! - **Role arbiter** ([`claim_role`]): pipe-binding exclusivity decides
//!   which process is Host and which is Client.
//! - **Process ledger** ([`ProcessLedger`]): durable accounting of spawned
//!   processes, descendants included, with orphan reconciliation across
//!   restarts.
//! - **Client supervisor** ([`ClientSupervisor`]): spawns the editor with
//!   debug ports, discovers the real PID behind the launcher stub, probes
//!   readiness, reconnects across extension-host reloads, and tears the
//!   tree down.
//! - **Hot-reload coordinator** ([`HotReloadCoordinator`]): content-hash
//!   change detection over the two packages, package-manager rebuilds, and
//!   restart orchestration bridged to user-visible progress.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devtools_runtime::{claim_role, PipeRpcServer, Role};
//!
//! # async fn activate() -> devtools_runtime::Result<()> {
//! let server = PipeRpcServer::new();
//! match claim_role(&server).await? {
//!     Role::Host => { /* install host handlers, spawn the client */ }
//!     Role::Client => { /* install ledger handlers */ }
//! }
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod barrier;
pub mod client;
pub mod control;
pub mod error;
pub mod handlers;
pub mod hotreload;
pub mod ledger;
pub mod osquery;
pub mod pipe;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod supervisor;

pub use arbiter::{claim_role, claim_role_at, Role};
pub use barrier::StatusBarrier;
pub use client::{PingReply, PipeRpcClient};
pub use control::{DebuggerControl, McpServerControl, NullDebugger, NullMcpControl};
pub use error::{Error, Result};
pub use handlers::{install_client_handlers, install_host_handlers};
pub use hotreload::{CheckResult, HotReloadCoordinator, PackageOutcome};
pub use ledger::{LedgerSummary, ProcessEntry, ProcessLedger, ProcessStatus};
pub use progress::{ProgressSink, ProgressTask, TracingProgress};
pub use registry::{HandlerRegistry, RpcHandler};
pub use server::PipeRpcServer;
pub use session::{SessionRecord, SessionStore};
pub use store::{HashStore, MemoryHashStore, SledHashStore};
pub use supervisor::{ClientEndpoints, ClientSupervisor, SupervisorConfig};
