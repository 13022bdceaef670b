//! Shelled-out OS process queries.
//!
//! Everything here goes through a child process (`lsof`/`kill`/`ps` on Unix,
//! `netstat`/`tasklist`/`taskkill` on Windows) so the event loop only ever
//! suspends, never blocks.

use crate::{Error, Result};
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillScope {
    /// Just the one process.
    Process,
    /// The process and everything descended from it.
    Tree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    /// The target was gone before we got to it; treated as success.
    AlreadyGone,
}

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq)]
pub struct OsProcess {
    pub pid: u32,
    pub parent_pid: u32,
    pub command: String,
}

/// PID of the process listening on a loopback TCP port, if any.
///
/// This is how the real editor PID is discovered: the launcher stub exits,
/// but whatever ends up serving the CDP port is the process we own.
#[cfg(not(windows))]
pub async fn pid_listening_on_port(port: u16) -> Result<Option<u32>> {
    let output = Command::new("lsof")
        .args(["-ti", &format!(":{}", port)])
        .output()
        .await
        .map_err(|e| Error::OsQuery(format!("lsof failed to run: {}", e)))?;
    // lsof exits non-zero when nothing matches; -t output is one PID per line.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pid_line = Regex::new(r"(?m)^\s*(\d+)\s*$")
        .map_err(|e| Error::OsQuery(format!("pid pattern: {}", e)))?;
    let pid = pid_line
        .captures_iter(&stdout)
        .next()
        .and_then(|captures| captures[1].parse().ok());
    Ok(pid)
}

/// PID of the process listening on a loopback TCP port, if any.
#[cfg(windows)]
pub async fn pid_listening_on_port(port: u16) -> Result<Option<u32>> {
    let output = Command::new("netstat")
        .args(["-ano"])
        .output()
        .await
        .map_err(|e| Error::OsQuery(format!("netstat failed to run: {}", e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Proto  Local Address  Foreign Address  State  PID — the local address
    // must end in exactly this port, not merely contain it.
    let listener = Regex::new(&format!(
        r"(?m)^\s*TCP\s+\S+:{}\s+\S+\s+LISTENING\s+(\d+)\s*$",
        port
    ))
    .map_err(|e| Error::OsQuery(format!("netstat pattern: {}", e)))?;
    Ok(listener
        .captures(&stdout)
        .and_then(|captures| captures[1].parse().ok()))
}

/// Whether the PID currently exists.
#[cfg(not(windows))]
pub async fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether the PID currently exists.
#[cfg(windows)]
pub async fn pid_alive(pid: u32) -> bool {
    let output = Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .await;
    match output {
        Ok(o) => String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()),
        Err(_) => false,
    }
}

/// Force-kill a PID. A target that is already gone counts as success.
#[cfg(not(windows))]
pub async fn kill_pid(pid: u32, _scope: KillScope) -> Result<KillOutcome> {
    let output = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .output()
        .await
        .map_err(|e| Error::OsQuery(format!("kill failed to run: {}", e)))?;
    if output.status.success() {
        return Ok(KillOutcome::Killed);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No such process") {
        return Ok(KillOutcome::AlreadyGone);
    }
    Err(Error::OsQuery(format!(
        "kill -9 {} failed: {}",
        pid,
        stderr.trim()
    )))
}

/// Force-kill a PID, optionally with its whole tree.
#[cfg(windows)]
pub async fn kill_pid(pid: u32, scope: KillScope) -> Result<KillOutcome> {
    let mut args = vec!["/F".to_string()];
    if scope == KillScope::Tree {
        args.push("/T".to_string());
    }
    args.push("/PID".to_string());
    args.push(pid.to_string());

    let output = Command::new("taskkill")
        .args(&args)
        .output()
        .await
        .map_err(|e| Error::OsQuery(format!("taskkill failed to run: {}", e)))?;
    if output.status.success() {
        return Ok(KillOutcome::Killed);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("not found") {
        return Ok(KillOutcome::AlreadyGone);
    }
    Err(Error::OsQuery(format!(
        "taskkill /PID {} failed: {}",
        pid,
        stderr.trim()
    )))
}

/// Snapshot of the full process table (pid, ppid, command).
#[cfg(not(windows))]
pub async fn process_table() -> Result<Vec<OsProcess>> {
    let output = Command::new("ps")
        .args(["-eo", "pid=,ppid=,args="])
        .output()
        .await
        .map_err(|e| Error::OsQuery(format!("ps failed to run: {}", e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut table = Vec::new();
    for line in stdout.lines() {
        let mut cols = line.split_whitespace();
        let (Some(pid), Some(ppid)) = (
            cols.next().and_then(|c| c.parse().ok()),
            cols.next().and_then(|c| c.parse().ok()),
        ) else {
            continue;
        };
        let command = cols.collect::<Vec<_>>().join(" ");
        table.push(OsProcess {
            pid,
            parent_pid: ppid,
            command,
        });
    }
    Ok(table)
}

/// Run a command to completion, bounded by `timeout`.
pub async fn run_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<std::process::Output> {
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result.map_err(|e| Error::OsQuery(format!("command failed to run: {}", e))),
        Err(_) => Err(Error::Timeout),
    }
}

/// Some CI images ship without lsof; port-discovery tests skip there.
#[cfg(all(test, unix))]
pub(crate) async fn lsof_available() -> bool {
    Command::new("lsof").arg("-v").output().await.is_ok()
}
