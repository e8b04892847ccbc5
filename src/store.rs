//! Single-document JSON store with atomic replace and optimistic versioning.
//!
//! The whole dashboard document is read and written wholesale; there are no
//! partial-field updates. Writes go through a temp file + rename so a crash
//! mid-write cannot leave a half-written document. Each committed write bumps
//! `version`, and `commit` rejects a snapshot whose version no longer matches
//! the file — overlapping invocations then retry through `update`, which is
//! safe because every mutation in this crate is idempotent (dedup keys,
//! bounded trims).

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::Document;

pub struct DocumentStore {
    path: PathBuf,
}

/// How many times `update` reloads and re-applies on a version conflict
/// before giving up.
const MAX_COMMIT_RETRIES: usize = 3;

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document. A missing file yields the default document; an
    /// unparseable one is swallowed with a warning and replaced by the
    /// default on the next write. The store never errors on read.
    pub fn read(&self) -> Document {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No document yet, starting from default");
                return Document::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Document unreadable, starting from default");
                return Document::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Document corrupt, resetting to default");
                Document::default()
            }
        }
    }

    /// Persist `doc` if its version still matches the file's. On success the
    /// stored version is `doc.version + 1`. Returns false on conflict.
    pub fn commit(&self, doc: &Document) -> anyhow::Result<bool> {
        let current = self.read();
        if current.version != doc.version {
            debug!(
                ours = doc.version,
                theirs = current.version,
                "Version conflict, rejecting commit"
            );
            return Ok(false);
        }

        let mut next = doc.clone();
        next.version += 1;
        self.write_atomic(&next)?;
        Ok(true)
    }

    /// Read-modify-write with conflict retry. The closure runs against a
    /// fresh snapshot on each attempt, so it must be idempotent — which
    /// every mutation in this crate is by design of the dedup keys.
    pub fn update<F>(&self, mut mutate: F) -> anyhow::Result<Document>
    where
        F: FnMut(&mut Document),
    {
        for attempt in 0..MAX_COMMIT_RETRIES {
            let mut doc = self.read();
            mutate(&mut doc);
            if self.commit(&doc)? {
                doc.version += 1;
                return Ok(doc);
            }
            warn!(attempt = attempt + 1, "Retrying document update after version conflict");
        }
        anyhow::bail!(
            "document update failed after {} version conflicts",
            MAX_COMMIT_RETRIES
        )
    }

    fn write_atomic(&self, doc: &Document) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.json".to_string());
        let tmp = self.path.with_file_name(format!(".{}.tmp", filename));

        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> DocumentStore {
        DocumentStore::new(dir.path().join("document.json"))
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir);
        let doc = store.read();
        assert_eq!(doc.version, 0);
        assert!(doc.facts.is_empty());
    }

    #[test]
    fn corrupt_file_resets_to_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();
        let doc = store.read();
        assert_eq!(doc.version, 0);
        assert!(doc.monitors.is_empty());
    }

    #[test]
    fn commit_bumps_version_and_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut doc = store.read();
        doc.evolution.last_run = "2026-01-01T00:00:00Z".to_string();
        assert!(store.commit(&doc).unwrap());

        let reread = store.read();
        assert_eq!(reread.version, 1);
        assert_eq!(reread.evolution.last_run, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn commit_rejects_stale_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir);

        let stale = store.read();
        let fresh = store.read();
        assert!(store.commit(&fresh).unwrap());
        // `stale` still claims version 0, the file is at 1.
        assert!(!store.commit(&stale).unwrap());
    }

    #[test]
    fn update_retries_past_a_conflict() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir);

        // Simulate a racing writer by committing behind the closure's back
        // on its first run only.
        let raced = std::cell::Cell::new(false);
        let doc = store
            .update(|doc| {
                if !raced.get() {
                    raced.set(true);
                    let other = store.read();
                    store.commit(&other).unwrap();
                }
                doc.evolution.last_run = "2026-02-02T00:00:00Z".to_string();
            })
            .unwrap();

        assert_eq!(doc.evolution.last_run, "2026-02-02T00:00:00Z");
        assert_eq!(store.read().evolution.last_run, "2026-02-02T00:00:00Z");
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir);
        store.update(|_| {}).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
