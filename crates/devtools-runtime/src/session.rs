//! Persisted description of the running Client.

use crate::Result;
use devtools_config::WorkspacePaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Real OS PID of the editor (not the launcher stub).
    pub pid: u32,
    pub cdp_port: u16,
    pub inspector_port: u16,
    pub extension_path: PathBuf,
    /// Milliseconds since the epoch at spawn time.
    pub started_at: i64,
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(paths: &WorkspacePaths) -> Self {
        Self {
            path: paths.session_file(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record. Missing and unreadable files are both
    /// `None`; a corrupt record is as invalid as no record.
    pub fn load(&self) -> Option<SessionRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return None,
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt session record");
                None
            }
        }
    }

    /// Write-then-rename so a crash never leaves a half-written record.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Delete the record; already-gone is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SessionStore {
        SessionStore::new(&WorkspacePaths::new(dir))
    }

    fn sample() -> SessionRecord {
        SessionRecord {
            pid: 4242,
            cdp_port: 9222,
            inspector_port: 9229,
            extension_path: PathBuf::from("/work/ext"),
            started_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.load().is_none());
        store.save(&sample()).unwrap();
        assert_eq!(store.load(), Some(sample()));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.save(&sample()).unwrap();
        let refreshed = SessionRecord {
            pid: 5555,
            ..sample()
        };
        store.save(&refreshed).unwrap();
        assert_eq!(store.load().unwrap().pid, 5555);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.save(&sample()).unwrap();
        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_record_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&sample()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["host-session.json"]);
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&sample()).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("cdpPort"));
        assert!(raw.contains("inspectorPort"));
        assert!(raw.contains("startedAt"));
    }
}
