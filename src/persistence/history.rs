//! History journal (spec §4.1, component C1).
//!
//! One JSON file per `(process, step)` pair. Steps are the durable record
//! of what happened to a process — negotiation, transfer, registry jobs —
//! independent of the in-memory `Process.history` map, which is just a
//! cache of the same facts for cheap reads.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::model::History;

use super::FileStore;

/// Append-only per-process, per-step history store backed by the filesystem.
///
/// Writes to a given process are serialized through a per-process lock so
/// two drivers racing to record different steps for the same process never
/// interleave a read-modify-write against the same step.
pub struct FileHistoryJournal {
    store: FileStore,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileHistoryJournal {
    pub fn new(store: FileStore) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, process_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(process_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record `entry` under `step_name`, replacing any prior entry for that
    /// step. `started` is preserved from the first append for that step
    /// name (spec §4.1); `updated` always reflects `entry`. Returns the
    /// entry as actually written, so callers updating an in-memory mirror
    /// never drift from what's on disk.
    pub async fn append(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
        entry: &History,
    ) -> Result<History, EngineError> {
        let lock = self.lock_for(process_id);
        let _guard = lock.lock().await;
        let path = self.store.history_file(process_id, is_registry, step_name);
        let existing: Option<History> = self.store.read_json(&path).await?;
        let mut entry = entry.clone();
        if let Some(existing) = existing {
            entry.started = existing.started;
        }
        self.store.write_json_atomic(&path, &entry).await?;
        Ok(entry)
    }

    /// Read the current entry for `step_name`, if any has been recorded.
    pub async fn read(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
    ) -> Result<Option<History>, EngineError> {
        let path = self.store.history_file(process_id, is_registry, step_name);
        self.store.read_json(&path).await
    }

    /// List every step recorded for a process, under both the plain and
    /// registry namespaces, keyed by step name.
    pub async fn list_steps(&self, process_id: &str) -> Result<HashMap<String, History>, EngineError> {
        let mut out = HashMap::new();
        for is_registry in [false, true] {
            let dir = self.store.history_dir(process_id, is_registry);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Some(history) = self.store.read_json::<History>(&path).await? {
                    out.insert(stem.to_string(), history);
                }
            }
        }
        Ok(out)
    }

    /// Remove a step's journal entry (used when tearing down a cancelled process).
    pub async fn remove(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(process_id);
        let _guard = lock.lock().await;
        let path = self.store.history_file(process_id, is_registry, step_name);
        self.store.remove_file_if_exists(&path).await
    }
}
