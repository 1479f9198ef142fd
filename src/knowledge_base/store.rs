//! On-disk artifacts of the knowledge base
//!
//! `knowledge_base.json` holds the last built snapshot; `correction_history.json`
//! holds the correction log. Both are written through a temp file and a rename so a
//! crash never leaves a truncated document behind.

use super::history::CorrectionEntry;
use super::KnowledgeSnapshot;
use crate::error::{Nl2SqlError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const KNOWLEDGE_FILE: &str = "knowledge_base.json";
pub const HISTORY_FILE: &str = "correction_history.json";

#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    dir: PathBuf,
}

impl KnowledgeStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.dir.join(KNOWLEDGE_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Previously saved snapshot. Absent or unreadable files yield `None`.
    pub fn load_snapshot(&self) -> Option<KnowledgeSnapshot> {
        let snapshot: KnowledgeSnapshot = read_json(&self.knowledge_path())?;
        info!(
            "Loaded knowledge base from {} ({} tables)",
            self.knowledge_path().display(),
            snapshot.schema.len()
        );
        Some(snapshot)
    }

    pub fn save_snapshot(&self, snapshot: &KnowledgeSnapshot) -> Result<()> {
        write_json(&self.knowledge_path(), snapshot)?;
        info!("Knowledge base saved to {}", self.knowledge_path().display());
        Ok(())
    }

    pub fn load_history(&self) -> Vec<CorrectionEntry> {
        read_json(&self.history_path()).unwrap_or_default()
    }

    pub fn save_history(&self, entries: &[CorrectionEntry]) -> Result<()> {
        write_json(&self.history_path(), entries)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return None,
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Nl2SqlError::KnowledgeBase(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let encoded = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, encoded)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::new(dir.path());
        assert!(store.load_snapshot().is_none());
        assert!(store.load_history().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::new(dir.path());
        fs::write(store.knowledge_path(), "{ not json").unwrap();
        assert!(store.load_snapshot().is_none());
    }

    #[test]
    fn test_snapshot_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::new(dir.path().join("nested"));
        let snapshot = KnowledgeSnapshot::empty("test.sqlite");
        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.metadata.source, "test.sqlite");
        assert!(!store.dir().join("knowledge_base.json.tmp").exists());
    }
}
