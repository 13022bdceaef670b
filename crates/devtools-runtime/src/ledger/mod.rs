//! Durable, cross-restart accounting of spawned processes.
//!
//! Two artifacts live under `.devtools/`: an append-only JSONL event log and
//! a fully-rewritten live snapshot. The snapshot is what startup
//! reconciliation reads: `running` entries from a prior session are either
//! still alive (kept as `orphaned`, killable) or dead (moved to the
//! recently-completed ring).

pub mod descendants;

pub use descendants::{ChildProcess, ChildrenByAncestor, DescendantCache};

use crate::osquery::{self, KillScope};
use crate::Result;
use chrono::{DateTime, Utc};
use devtools_config::WorkspacePaths;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const RECENTLY_COMPLETED_CAP: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Killed,
    Orphaned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub pid: u32,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_name: Option<String>,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ChildProcess>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogEvent {
    event: &'static str,
    pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    ts: DateTime<Utc>,
    session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    session_id: String,
    processes: Vec<ProcessEntry>,
    saved_at: DateTime<Utc>,
}

/// Full ledger view returned over RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub session_id: String,
    pub active: Vec<ProcessEntry>,
    pub orphaned: Vec<ProcessEntry>,
    pub recently_completed: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedKill {
    pub pid: u32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KillOrphansOutcome {
    pub killed: Vec<u32>,
    pub failed: Vec<FailedKill>,
}

#[derive(Default)]
struct LedgerState {
    active: Vec<ProcessEntry>,
    orphaned: Vec<ProcessEntry>,
    recently_completed: VecDeque<ProcessEntry>,
}

impl LedgerState {
    fn push_completed(&mut self, entry: ProcessEntry) {
        self.recently_completed.push_back(entry);
        while self.recently_completed.len() > RECENTLY_COMPLETED_CAP {
            self.recently_completed.pop_front();
        }
    }

    fn take_tracked(&mut self, pid: u32) -> Option<ProcessEntry> {
        if let Some(pos) = self.active.iter().position(|e| e.pid == pid) {
            return Some(self.active.remove(pos));
        }
        if let Some(pos) = self.orphaned.iter().position(|e| e.pid == pid) {
            return Some(self.orphaned.remove(pos));
        }
        None
    }

    fn tracked_pids(&self) -> Vec<u32> {
        self.active
            .iter()
            .chain(self.orphaned.iter())
            .map(|e| e.pid)
            .collect()
    }
}

pub struct ProcessLedger {
    paths: WorkspacePaths,
    session_id: String,
    state: Mutex<LedgerState>,
    descendants: DescendantCache,
}

impl ProcessLedger {
    pub fn new(paths: WorkspacePaths) -> Self {
        Self {
            paths,
            session_id: new_session_id(),
            state: Mutex::new(LedgerState::default()),
            descendants: DescendantCache::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Load the prior snapshot and reconcile it against the live OS:
    /// still-running leftovers become `orphaned`, dead ones complete.
    pub async fn initialize(&self) -> Result<()> {
        let snapshot = self.load_snapshot();
        let mut state = self.state.lock().await;

        if let Some(snapshot) = snapshot {
            for mut entry in snapshot.processes {
                match entry.status {
                    ProcessStatus::Running | ProcessStatus::Orphaned => {
                        if osquery::pid_alive(entry.pid).await {
                            info!(pid = entry.pid, command = %entry.command, "orphan from prior session");
                            entry.status = ProcessStatus::Orphaned;
                            state.orphaned.push(entry);
                        } else {
                            entry.status = ProcessStatus::Completed;
                            entry.ended_at = Some(Utc::now());
                            state.push_completed(entry);
                        }
                    }
                    ProcessStatus::Completed | ProcessStatus::Killed => {
                        state.push_completed(entry);
                    }
                }
            }
        }

        self.save_snapshot(&state)?;
        Ok(())
    }

    pub async fn log_started(
        &self,
        pid: u32,
        command: impl Into<String>,
        terminal_name: Option<String>,
    ) -> Result<()> {
        let command = command.into();
        let mut state = self.state.lock().await;
        state.active.push(ProcessEntry {
            pid,
            command: command.clone(),
            terminal_name: terminal_name.clone(),
            status: ProcessStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            exit_code: None,
            session_id: self.session_id.clone(),
            children: None,
        });
        self.append_event(LogEvent {
            event: "started",
            pid,
            command: Some(command),
            terminal_name,
            exit_code: None,
            ts: Utc::now(),
            session_id: self.session_id.clone(),
        })?;
        self.save_snapshot(&state)
    }

    pub async fn log_completed(&self, pid: u32, exit_code: Option<i32>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut entry) = state.take_tracked(pid) {
            entry.status = ProcessStatus::Completed;
            entry.ended_at = Some(Utc::now());
            entry.exit_code = exit_code;
            state.push_completed(entry);
        }
        self.append_event(LogEvent {
            event: "completed",
            pid,
            command: None,
            terminal_name: None,
            exit_code,
            ts: Utc::now(),
            session_id: self.session_id.clone(),
        })?;
        self.save_snapshot(&state)
    }

    /// Kill one PID. A target that is already gone is success; the `killed`
    /// event is only logged while the PID is still tracked, so killing twice
    /// never double-logs.
    pub async fn kill(&self, pid: u32) -> Result<()> {
        osquery::kill_pid(pid, KillScope::Process).await?;

        let mut state = self.state.lock().await;
        if let Some(mut entry) = state.take_tracked(pid) {
            entry.status = ProcessStatus::Killed;
            entry.ended_at = Some(Utc::now());
            state.push_completed(entry);
            self.append_event(LogEvent {
                event: "killed",
                pid,
                command: None,
                terminal_name: None,
                exit_code: None,
                ts: Utc::now(),
                session_id: self.session_id.clone(),
            })?;
            self.save_snapshot(&state)?;
        }
        Ok(())
    }

    /// Kill every orphan, collecting per-PID outcomes instead of failing on
    /// the first error.
    pub async fn kill_orphans(&self) -> Result<KillOrphansOutcome> {
        let pids: Vec<u32> = {
            let state = self.state.lock().await;
            state.orphaned.iter().map(|e| e.pid).collect()
        };

        let mut outcome = KillOrphansOutcome::default();
        for pid in pids {
            match self.kill(pid).await {
                Ok(()) => outcome.killed.push(pid),
                Err(e) => outcome.failed.push(FailedKill {
                    pid,
                    error: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    /// Ledger view with descendants attached from the TTL cache.
    pub async fn summary(&self) -> Result<LedgerSummary> {
        let tracked = {
            let state = self.state.lock().await;
            state.tracked_pids()
        };
        let children = match self.descendants.get(&tracked).await {
            Ok(children) => children,
            Err(e) => {
                warn!(error = %e, "descendant query failed; summary without children");
                ChildrenByAncestor::new()
            }
        };

        let state = self.state.lock().await;
        let attach = |entry: &ProcessEntry| {
            let mut entry = entry.clone();
            entry.children = children.get(&entry.pid).cloned();
            entry
        };
        Ok(LedgerSummary {
            session_id: self.session_id.clone(),
            active: state.active.iter().map(attach).collect(),
            orphaned: state.orphaned.iter().map(attach).collect(),
            recently_completed: state.recently_completed.iter().cloned().collect(),
        })
    }

    /// Force a fresh descendant snapshot regardless of TTL.
    pub async fn refresh_active_children(&self) -> Result<()> {
        let tracked = {
            let state = self.state.lock().await;
            state.tracked_pids()
        };
        self.descendants.refresh(&tracked).await?;
        Ok(())
    }

    fn append_event(&self, event: LogEvent) -> Result<()> {
        let path = self.paths.process_log();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn load_snapshot(&self) -> Option<Snapshot> {
        let content = std::fs::read_to_string(self.paths.active_processes()).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "discarding corrupt process snapshot");
                None
            }
        }
    }

    fn save_snapshot(&self, state: &LedgerState) -> Result<()> {
        let path = self.paths.active_processes();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot {
            session_id: self.session_id.clone(),
            processes: state
                .active
                .iter()
                .chain(state.orphaned.iter())
                .chain(state.recently_completed.iter())
                .cloned()
                .collect(),
            saved_at: Utc::now(),
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// ISO timestamp with the separators stripped, unique per process start.
fn new_session_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}
