//! Filesystem-backed persistence (spec §4.1, §4.2, §6).
//!
//! Every process gets its own directory under the configured storage root:
//!
//! ```text
//! <root>/<processId>/process.json
//! <root>/<processId>/history/<step>.json
//! <root>/<processId>/history/registry/<step>.json
//! ```
//!
//! Writes go through a temp-file-then-rename so a crash mid-write never
//! leaves a half-written file where a reader would see it.

pub mod history;
pub mod process_store;

use std::path::{Path, PathBuf};

use crate::error::EngineError;

pub use history::FileHistoryJournal;
pub use process_store::ProcessStore;

/// Root filesystem location plus the atomic read/write primitives the
/// journal and process store both build on.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn process_dir(&self, process_id: &str) -> PathBuf {
        self.root.join(process_id)
    }

    pub fn process_file(&self, process_id: &str) -> PathBuf {
        self.process_dir(process_id).join("process.json")
    }

    pub fn history_dir(&self, process_id: &str, is_registry: bool) -> PathBuf {
        let dir = self.process_dir(process_id).join("history");
        if is_registry {
            dir.join("registry")
        } else {
            dir
        }
    }

    pub fn history_file(&self, process_id: &str, is_registry: bool, step_name: &str) -> PathBuf {
        self.history_dir(process_id, is_registry)
            .join(format!("{step_name}.json"))
    }

    /// Write `value` to `path` as JSON, creating parent directories as
    /// needed, via a sibling temp file renamed into place.
    pub async fn write_json_atomic<T: serde::Serialize + Sync>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read and parse a JSON file. Returns `Ok(None)` if it doesn't exist.
    pub async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, EngineError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn remove_file_if_exists(&self, path: &Path) -> Result<(), EngineError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let path = store.process_file("p1");
        store
            .write_json_atomic(&path, &Sample { value: 7 })
            .await
            .unwrap();
        let loaded: Option<Sample> = store.read_json(&path).await.unwrap();
        assert_eq!(loaded, Some(Sample { value: 7 }));
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let loaded: Option<Sample> = store.read_json(&store.process_file("missing")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn history_dir_namespaces_registry_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store
            .history_file("p1", true, "dtr-r1-transfer")
            .ends_with("history/registry/dtr-r1-transfer.json"));
        assert!(store
            .history_file("p1", false, "negotiation")
            .ends_with("history/negotiation.json"));
    }
}
