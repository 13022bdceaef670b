//! Startup role arbitration.
//!
//! Pipe binding is exclusive, so the first process to claim the Host pipe is
//! the Host; a second process falls back to the Client pipe. The Client
//! attempt retries briefly because the OS releases a dying Client's pipe name
//! with a small delay. The Host attempt deliberately does not retry.

use crate::server::PipeRpcServer;
use crate::{Error, Result};
use devtools_config::{client_pipe_path, host_pipe_path};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const CLIENT_CLAIM_ATTEMPTS: u32 = 6;
pub const CLIENT_CLAIM_BACKOFF_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    pub fn pipe_path(&self) -> PathBuf {
        match self {
            Role::Host => host_pipe_path(),
            Role::Client => client_pipe_path(),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Race for a role by binding the well-known pipes onto `server`.
///
/// Returns [`Error::SessionConflict`] when both names stay held through the
/// retry budget; any non-bind failure propagates unchanged.
pub async fn claim_role(server: &PipeRpcServer) -> Result<Role> {
    claim_role_at(server, &host_pipe_path(), &client_pipe_path()).await
}

/// Same race against explicit pipe paths (tests use scratch names).
pub async fn claim_role_at(
    server: &PipeRpcServer,
    host_pipe: &std::path::Path,
    client_pipe: &std::path::Path,
) -> Result<Role> {
    match server.start(host_pipe).await {
        Ok(()) => {
            info!(pipe = %host_pipe.display(), "claimed host role");
            return Ok(Role::Host);
        }
        Err(e) if e.is_addr_in_use() => {
            info!(pipe = %host_pipe.display(), "host pipe held; trying client role");
        }
        Err(e) => return Err(e),
    }

    let mut delay = Duration::ZERO;
    for attempt in 1..=CLIENT_CLAIM_ATTEMPTS {
        match server.start(client_pipe).await {
            Ok(()) => {
                info!(pipe = %client_pipe.display(), attempt, "claimed client role");
                return Ok(Role::Client);
            }
            Err(e) if e.is_addr_in_use() => {
                if attempt == CLIENT_CLAIM_ATTEMPTS {
                    break;
                }
                delay += CLIENT_CLAIM_BACKOFF_STEP;
                warn!(
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "client pipe held; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::SessionConflict)
}
