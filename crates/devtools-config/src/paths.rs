//! Well-known pipe names and the on-disk state layout.
//!
//! The two role pipes use fixed names so that pipe binding can double as
//! role arbitration. The MCP control pipe is per-workspace: its Windows name
//! carries the first 8 hex digits of the SHA-256 of the lowercased absolute
//! workspace path, while on Unix it lives inside the workspace itself.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const HOST_PIPE_NAME: &str = "vscode-devtools-host";
pub const CLIENT_PIPE_NAME: &str = "vscode-devtools-client";

/// Fixed pipe path for the Host role.
pub fn host_pipe_path() -> PathBuf {
    role_pipe_path(HOST_PIPE_NAME)
}

/// Fixed pipe path for the Client role.
pub fn client_pipe_path() -> PathBuf {
    role_pipe_path(CLIENT_PIPE_NAME)
}

#[cfg(windows)]
fn role_pipe_path(name: &str) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{}", name))
}

#[cfg(not(windows))]
fn role_pipe_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.sock", name))
}

/// Per-workspace control pipe the external MCP process listens on.
#[cfg(windows)]
pub fn mcp_pipe_path(workspace: &Path) -> PathBuf {
    let digest = workspace_digest(workspace);
    PathBuf::from(format!(r"\\.\pipe\vscode-devtools-mcp-{}", &digest[..8]))
}

/// Per-workspace control pipe the external MCP process listens on.
#[cfg(not(windows))]
pub fn mcp_pipe_path(workspace: &Path) -> PathBuf {
    workspace.join(".vscode").join("vscode-devtools-mcp.sock")
}

/// Hex SHA-256 of the lowercased absolute workspace path.
pub fn workspace_digest(workspace: &Path) -> String {
    let lowered = workspace.to_string_lossy().to_lowercase();
    let digest = Sha256::digest(lowered.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Paths for everything the core persists under a target workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    workspace: PathBuf,
}

impl WorkspacePaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// `.devtools/` state directory under the workspace.
    pub fn devtools_dir(&self) -> PathBuf {
        self.workspace.join(".devtools")
    }

    /// Persisted session record for the running Client.
    pub fn session_file(&self) -> PathBuf {
        self.devtools_dir().join("host-session.json")
    }

    /// User-data directory handed to the spawned Client.
    pub fn user_data_dir(&self) -> PathBuf {
        self.devtools_dir().join("user-data")
    }

    /// Append-only process event log.
    pub fn process_log(&self) -> PathBuf {
        self.devtools_dir().join("process-log.jsonl")
    }

    /// Live snapshot of tracked processes.
    pub fn active_processes(&self) -> PathBuf {
        self.devtools_dir().join("active-processes.json")
    }

    /// User-editable host configuration.
    pub fn host_config(&self) -> PathBuf {
        self.devtools_dir().join("host.config.jsonc")
    }

    /// Hot-reload hash store (sled database directory).
    pub fn hash_store(&self) -> PathBuf {
        self.devtools_dir().join("hash-store")
    }

    /// Ignore file honored by analysis tools; the core only checks existence.
    pub fn ignore_file(&self) -> PathBuf {
        self.workspace.join(".devtoolsignore")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_pipe_paths_are_distinct() {
        assert_ne!(host_pipe_path(), client_pipe_path());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unix_pipe_paths_are_socket_files() {
        assert!(host_pipe_path().to_string_lossy().ends_with(".sock"));
        assert!(client_pipe_path().to_string_lossy().ends_with(".sock"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_mcp_pipe_lives_inside_workspace() {
        let path = mcp_pipe_path(Path::new("/work/project"));
        assert_eq!(
            path,
            PathBuf::from("/work/project/.vscode/vscode-devtools-mcp.sock")
        );
    }

    #[test]
    fn test_workspace_digest_is_case_insensitive() {
        let a = workspace_digest(Path::new("/Work/Project"));
        let b = workspace_digest(Path::new("/work/project"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_workspace_digest_differs_per_workspace() {
        let a = workspace_digest(Path::new("/work/one"));
        let b = workspace_digest(Path::new("/work/two"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_state_layout_under_devtools_dir() {
        let paths = WorkspacePaths::new("/work/project");
        let root = paths.devtools_dir();
        assert!(paths.session_file().starts_with(&root));
        assert!(paths.user_data_dir().starts_with(&root));
        assert!(paths.process_log().starts_with(&root));
        assert!(paths.active_processes().starts_with(&root));
        assert!(paths.hash_store().starts_with(&root));
        assert_eq!(
            paths.ignore_file(),
            PathBuf::from("/work/project/.devtoolsignore")
        );
    }
}
