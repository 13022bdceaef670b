//! Package rebuilds through the package's own manager.
//!
//! Build failures are data: the caller gets the combined stderr/stdout as a
//! diagnostic string and decides what to surface. Only infrastructure
//! problems (the manager cannot even run) are errors.

use crate::Result;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

pub const BUILD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Pnpm,
    Yarn,
    Npm,
}

impl PackageManager {
    /// Lockfile sniffing; npm is the fallback.
    pub fn detect(dir: &Path) -> Self {
        if dir.join("pnpm-lock.yaml").exists() {
            PackageManager::Pnpm
        } else if dir.join("yarn.lock").exists() {
            PackageManager::Yarn
        } else {
            PackageManager::Npm
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Npm => "npm",
        }
    }
}

/// Run `<pm> run <script>` in `dir`. `None` means the build succeeded;
/// `Some(diagnostic)` is the failure text for the caller to surface.
pub async fn run_build(dir: &Path, script: &str) -> Result<Option<String>> {
    let manager = PackageManager::detect(dir);
    info!(dir = %dir.display(), manager = manager.command(), script, "rebuilding package");

    let spawned = Command::new(manager.command())
        .args(["run", script])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match tokio::time::timeout(BUILD_TIMEOUT, spawned).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            // The manager itself failed to run; still a build diagnostic,
            // not a crash.
            return Ok(Some(format!("{} failed to run: {}", manager.command(), e)));
        }
        Err(_) => {
            warn!(dir = %dir.display(), "build timed out");
            return Ok(Some(format!(
                "build timed out after {}s",
                BUILD_TIMEOUT.as_secs()
            )));
        }
    };

    if output.status.success() {
        return Ok(None);
    }

    let mut diagnostic = String::from_utf8_lossy(&output.stderr).into_owned();
    diagnostic.push_str(&String::from_utf8_lossy(&output.stdout));
    Ok(Some(diagnostic))
}
