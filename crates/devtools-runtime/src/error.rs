use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipe name already bound: {0}")]
    AddrInUse(PathBuf),

    #[error("Session conflict: host and client pipes are both held")]
    SessionConflict,

    #[error("Spawn failed: {0}")]
    Spawn(String),

    #[error("Client not ready: {0}")]
    Readiness(String),

    #[error("OS query failed: {0}")]
    OsQuery(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Timeout error")]
    Timeout,
}

impl Error {
    /// The role arbiter branches on this kind.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, Error::AddrInUse(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
