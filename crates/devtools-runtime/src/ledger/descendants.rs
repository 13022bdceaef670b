//! Recursive descendant discovery for tracked PIDs.
//!
//! Windows goes through CIM (`Win32_Process` by `ParentProcessId`) via an
//! encoded PowerShell script; elsewhere the process table comes from `ps`
//! and the walk happens here. Either way the interface is platform-neutral:
//! tracked PIDs in, children grouped by nearest tracked ancestor out.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Queries are bounded: a runaway parent/child graph stops expanding here.
const MAX_WALK_ITERATIONS: usize = 200;
/// PowerShell gets this long before the query is abandoned.
#[cfg(windows)]
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChildProcess {
    pub pid: u32,
    pub parent_pid: u32,
    pub command: String,
}

/// Children grouped by the tracked ancestor they roll up to.
pub type ChildrenByAncestor = HashMap<u32, Vec<ChildProcess>>;

struct CacheEntry {
    key: Vec<u32>,
    at: Instant,
    children: ChildrenByAncestor,
}

/// TTL-bounded cache over the descendant query.
///
/// The query shells out and is expensive; ledger summaries may arrive far
/// faster than 5 s apart. The cache key is the tracked PID set, so a change
/// in what is tracked always misses.
pub struct DescendantCache {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl DescendantCache {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached children for `tracked`, refreshing when stale.
    pub async fn get(&self, tracked: &[u32]) -> Result<ChildrenByAncestor> {
        let key = sorted(tracked);
        {
            let entry = self.entry.lock().await;
            if let Some(entry) = entry.as_ref() {
                if entry.key == key && entry.at.elapsed() < self.ttl {
                    return Ok(entry.children.clone());
                }
            }
        }
        self.refresh(tracked).await
    }

    /// Bypass the TTL and query now.
    pub async fn refresh(&self, tracked: &[u32]) -> Result<ChildrenByAncestor> {
        let key = sorted(tracked);
        let children = if tracked.is_empty() {
            ChildrenByAncestor::new()
        } else {
            query_descendants(tracked).await?
        };
        let mut entry = self.entry.lock().await;
        *entry = Some(CacheEntry {
            key,
            at: Instant::now(),
            children: children.clone(),
        });
        Ok(children)
    }
}

impl Default for DescendantCache {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(pids: &[u32]) -> Vec<u32> {
    let mut key = pids.to_vec();
    key.sort_unstable();
    key.dedup();
    key
}

/// Attach every discovered process to its nearest tracked ancestor by
/// walking up the parent chain.
pub(crate) fn group_by_ancestor(
    tracked: &[u32],
    table: &[crate::osquery::OsProcess],
) -> ChildrenByAncestor {
    let parent_of: HashMap<u32, u32> = table.iter().map(|p| (p.pid, p.parent_pid)).collect();
    let is_tracked: std::collections::HashSet<u32> = tracked.iter().copied().collect();

    let mut grouped = ChildrenByAncestor::new();
    for process in table {
        if is_tracked.contains(&process.pid) {
            continue;
        }
        let mut cursor = process.parent_pid;
        let mut hops = 0;
        while hops < MAX_WALK_ITERATIONS {
            if is_tracked.contains(&cursor) {
                grouped
                    .entry(cursor)
                    .or_default()
                    .push(ChildProcess {
                        pid: process.pid,
                        parent_pid: process.parent_pid,
                        command: process.command.clone(),
                    });
                break;
            }
            match parent_of.get(&cursor) {
                Some(&next) if next != cursor => cursor = next,
                _ => break,
            }
            hops += 1;
        }
    }
    for children in grouped.values_mut() {
        children.sort_by_key(|c| c.pid);
    }
    grouped
}

#[cfg(not(windows))]
async fn query_descendants(tracked: &[u32]) -> Result<ChildrenByAncestor> {
    let table = crate::osquery::process_table().await?;
    debug!(tracked = tracked.len(), table = table.len(), "descendant walk");
    Ok(group_by_ancestor(tracked, &table))
}

#[cfg(windows)]
async fn query_descendants(tracked: &[u32]) -> Result<ChildrenByAncestor> {
    use crate::osquery::OsProcess;
    use base64::Engine;

    let roots = tracked
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let script = format!(
        r#"$roots = @({roots})
$procs = Get-CimInstance Win32_Process | Select-Object ProcessId,ParentProcessId,Name
$byParent = @{{}}
foreach ($p in $procs) {{
  if (-not $byParent.ContainsKey($p.ParentProcessId)) {{ $byParent[$p.ParentProcessId] = @() }}
  $byParent[$p.ParentProcessId] += $p
}}
$frontier = [System.Collections.Queue]::new()
foreach ($r in $roots) {{ $frontier.Enqueue([uint32]$r) }}
$seen = @{{}}
$out = @()
$i = 0
while ($frontier.Count -gt 0 -and $i -lt {max_iter}) {{
  $i++
  $parent = $frontier.Dequeue()
  if ($byParent.ContainsKey($parent)) {{
    foreach ($c in $byParent[$parent]) {{
      if (-not $seen.ContainsKey($c.ProcessId)) {{
        $seen[$c.ProcessId] = $true
        $out += [pscustomobject]@{{ pid = $c.ProcessId; ppid = $c.ParentProcessId; command = $c.Name }}
        $frontier.Enqueue($c.ProcessId)
      }}
    }}
  }}
}}
ConvertTo-Json -Compress -InputObject @($out)"#,
        roots = roots,
        max_iter = MAX_WALK_ITERATIONS,
    );

    // PowerShell expects -EncodedCommand as base64 over UTF-16LE.
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    let encoded = base64::engine::general_purpose::STANDARD.encode(utf16);

    let mut command = tokio::process::Command::new("powershell");
    command.args(["-NoProfile", "-EncodedCommand", &encoded]);
    let output = crate::osquery::run_with_timeout(&mut command, QUERY_TIMEOUT).await?;

    #[derive(Deserialize)]
    struct Row {
        pid: u32,
        ppid: u32,
        command: String,
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    let rows: Vec<Row> = if trimmed.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(trimmed)
            .map_err(|e| crate::Error::OsQuery(format!("CIM output parse failed: {}", e)))?
    };

    let table: Vec<OsProcess> = rows
        .into_iter()
        .map(|r| OsProcess {
            pid: r.pid,
            parent_pid: r.ppid,
            command: r.command,
        })
        .collect();
    debug!(tracked = tracked.len(), found = table.len(), "descendant walk (CIM)");
    Ok(group_by_ancestor(tracked, &table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osquery::OsProcess;

    fn proc(pid: u32, parent_pid: u32) -> OsProcess {
        OsProcess {
            pid,
            parent_pid,
            command: format!("proc-{}", pid),
        }
    }

    #[test]
    fn test_direct_children_attach_to_parent() {
        let table = vec![proc(100, 1), proc(200, 100), proc(201, 100)];
        let grouped = group_by_ancestor(&[100], &table);
        let children = &grouped[&100];
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].pid, 200);
        assert_eq!(children[1].pid, 201);
    }

    #[test]
    fn test_grandchildren_attach_to_nearest_tracked_ancestor() {
        // 100 (tracked) -> 200 -> 300
        let table = vec![proc(100, 1), proc(200, 100), proc(300, 200)];
        let grouped = group_by_ancestor(&[100], &table);
        let pids: Vec<u32> = grouped[&100].iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![200, 300]);
    }

    #[test]
    fn test_nested_tracked_pid_takes_precedence() {
        // Both 100 and 200 tracked; 300 rolls up to 200, not 100.
        let table = vec![proc(100, 1), proc(200, 100), proc(300, 200)];
        let grouped = group_by_ancestor(&[100, 200], &table);
        assert!(grouped[&200].iter().any(|c| c.pid == 300));
        assert!(!grouped.contains_key(&100) || grouped[&100].iter().all(|c| c.pid != 300));
    }

    #[test]
    fn test_unrelated_processes_ignored() {
        let table = vec![proc(100, 1), proc(500, 1)];
        let grouped = group_by_ancestor(&[100], &table);
        assert!(grouped.is_empty());
    }

    #[test]
    fn test_parent_cycle_terminates() {
        // Corrupt table with a cycle must not loop forever.
        let table = vec![proc(200, 300), proc(300, 200)];
        let grouped = group_by_ancestor(&[100], &table);
        assert!(grouped.is_empty());
    }

    #[tokio::test]
    async fn test_empty_tracked_set_is_empty_without_query() {
        let cache = DescendantCache::new();
        let grouped = cache.get(&[]).await.unwrap();
        assert!(grouped.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_hits_within_ttl() {
        let cache = DescendantCache::with_ttl(Duration::from_secs(60));
        let me = std::process::id();
        let first = cache.get(&[me]).await.unwrap();
        // Second read within TTL returns the same snapshot (no re-query).
        let second = cache.get(&[me]).await.unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_misses_on_key_change() {
        let cache = DescendantCache::with_ttl(Duration::from_secs(60));
        let me = std::process::id();
        cache.get(&[me]).await.unwrap();
        // Different tracked set bypasses the cached entry.
        let other = cache.get(&[me, 1]).await.unwrap();
        let _ = other;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_child_discovered() {
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .unwrap();
        let me = std::process::id();

        let cache = DescendantCache::with_ttl(Duration::from_millis(1));
        let grouped = cache.refresh(&[me]).await.unwrap();
        let mine = grouped.get(&me).cloned().unwrap_or_default();
        assert!(mine.iter().any(|c| c.pid == child.id()));

        child.kill().ok();
        child.wait().ok();
    }
}
