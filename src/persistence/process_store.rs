//! Process store (spec §4.2, component C2).
//!
//! Holds the authoritative `Process` record: an in-memory cache over the
//! same JSON file the journal's steps live next to, refreshed lazily on
//! first access per process (`handle`) and kept warm for the process's
//! lifetime. Every composite save* goes through `set_status`, which writes
//! the journal before the process snapshot and rolls the journal back if
//! the snapshot write fails — the two are never left disagreeing.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::model::{now_millis, History, IdResponse, JobHistory, Negotiation, Process, ProcessState, Transfer};

use super::{FileHistoryJournal, FileStore};

pub struct ProcessStore {
    store: FileStore,
    journal: Arc<FileHistoryJournal>,
    processes: DashMap<String, Arc<Mutex<Process>>>,
}

impl ProcessStore {
    pub fn new(store: FileStore, journal: Arc<FileHistoryJournal>) -> Self {
        Self {
            store,
            journal,
            processes: DashMap::new(),
        }
    }

    pub async fn create(
        &self,
        id: impl Into<String>,
        endpoint: impl Into<String>,
        bpn: impl Into<String>,
    ) -> Result<Process, EngineError> {
        let process = Process::new(id, endpoint, bpn);
        self.persist(&process).await?;
        self.processes
            .insert(process.id.clone(), Arc::new(Mutex::new(process.clone())));
        Ok(process)
    }

    async fn handle(&self, process_id: &str) -> Result<Arc<Mutex<Process>>, EngineError> {
        if let Some(existing) = self.processes.get(process_id) {
            return Ok(existing.clone());
        }
        let loaded = self
            .store
            .read_json::<Process>(&self.store.process_file(process_id))
            .await?;
        let process = loaded.ok_or_else(|| {
            EngineError::StorageError(format!("process not found: {process_id}"))
        })?;
        let handle = Arc::new(Mutex::new(process));
        // Another task may have raced us to load the same process; keep whichever
        // handle landed first so callers always observe a single shared lock.
        let handle = self
            .processes
            .entry(process_id.to_string())
            .or_insert(handle)
            .clone();
        Ok(handle)
    }

    async fn persist(&self, process: &Process) -> Result<(), EngineError> {
        self.store
            .write_json_atomic(&self.store.process_file(&process.id), process)
            .await
    }

    pub async fn get(&self, process_id: &str) -> Result<Process, EngineError> {
        let handle = self.handle(process_id).await?;
        Ok(handle.lock().await.clone())
    }

    /// Validated state transition (spec §3 process lifecycle), persisted.
    pub async fn transition(&self, process_id: &str, next: ProcessState) -> Result<(), EngineError> {
        let handle = self.handle(process_id).await?;
        let mut guard = handle.lock().await;
        guard.state.validate_transition(next)?;
        guard.state = next;
        guard.modified_at = now_millis();
        self.persist(&guard).await
    }

    /// Record a journal step and mirror it into the process snapshot.
    pub async fn set_status(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
        entry: History,
    ) -> Result<(), EngineError> {
        let entry = self.journal.append(process_id, is_registry, step_name, &entry).await?;
        let handle = self.handle(process_id).await?;
        let mut guard = handle.lock().await;
        let previous = guard.history.get(step_name).cloned();
        guard.record(step_name, entry);
        if let Err(err) = self.persist(&guard).await {
            match previous {
                Some(prev) => {
                    guard.history.insert(step_name.to_string(), prev);
                }
                None => {
                    guard.history.remove(step_name);
                }
            }
            let _ = self.journal.remove(process_id, is_registry, step_name).await;
            return Err(err);
        }
        Ok(())
    }

    pub async fn save_negotiation_request(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
        response: &IdResponse,
    ) -> Result<(), EngineError> {
        self.set_status(
            process_id,
            is_registry,
            step_name,
            History::new(response.id.clone(), "REQUESTED"),
        )
        .await
    }

    pub async fn save_transfer_request(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
        response: &IdResponse,
    ) -> Result<(), EngineError> {
        self.set_status(
            process_id,
            is_registry,
            step_name,
            History::new(response.id.clone(), "REQUESTED"),
        )
        .await
    }

    pub async fn save_negotiation(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
        negotiation: &Negotiation,
    ) -> Result<(), EngineError> {
        self.set_status(
            process_id,
            is_registry,
            step_name,
            History::new(negotiation.id.clone(), negotiation.state.as_edc_state()),
        )
        .await
    }

    pub async fn save_transfer(
        &self,
        process_id: &str,
        is_registry: bool,
        step_name: &str,
        transfer: &Transfer,
    ) -> Result<(), EngineError> {
        self.set_status(
            process_id,
            is_registry,
            step_name,
            History::new(transfer.id.clone(), transfer.state.as_edc_state()),
        )
        .await
    }

    /// Replace the registry job history wholesale under `search_id` (see the
    /// `jobs` open-question resolution in DESIGN.md: never mutated in place).
    pub async fn save_job(
        &self,
        process_id: &str,
        search_id: impl Into<String>,
        endpoint_ids: Vec<String>,
    ) -> Result<(), EngineError> {
        let handle = self.handle(process_id).await?;
        let mut guard = handle.lock().await;
        let search_id = search_id.into();
        let now = now_millis();
        let mut jobs = guard.jobs.clone().unwrap_or_default();
        jobs.insert(
            search_id.clone(),
            JobHistory {
                search_id,
                endpoint_ids,
                started: now,
                updated: now,
            },
        );
        guard.jobs = Some(jobs);
        guard.modified_at = now;
        self.persist(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ProcessStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let journal = Arc::new(FileHistoryJournal::new(store.clone()));
        (dir, ProcessStore::new(store, journal))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, store) = setup();
        store.create("p1", "https://prov", "BPNL000TEST").await.unwrap();
        let process = store.get("p1").await.unwrap();
        assert_eq!(process.id, "p1");
        assert_eq!(process.state, ProcessState::Created);
    }

    #[tokio::test]
    async fn get_on_cold_store_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let journal = Arc::new(FileHistoryJournal::new(store.clone()));
        {
            let writer = ProcessStore::new(store.clone(), journal.clone());
            writer.create("p1", "https://prov", "BPNL000TEST").await.unwrap();
        }
        let reader = ProcessStore::new(store, journal);
        let process = reader.get("p1").await.unwrap();
        assert_eq!(process.id, "p1");
    }

    #[tokio::test]
    async fn get_missing_process_is_storage_error() {
        let (_dir, store) = setup();
        assert!(matches!(
            store.get("missing").await,
            Err(EngineError::StorageError(_))
        ));
    }

    #[tokio::test]
    async fn transition_rejects_illegal_jump() {
        let (_dir, store) = setup();
        store.create("p1", "https://prov", "BPNL000TEST").await.unwrap();
        assert!(matches!(
            store.transition("p1", ProcessState::Completed).await,
            Err(EngineError::InvalidState(_))
        ));
        store.transition("p1", ProcessState::Running).await.unwrap();
        let process = store.get("p1").await.unwrap();
        assert_eq!(process.state, ProcessState::Running);
    }

    #[tokio::test]
    async fn save_negotiation_mirrors_journal_into_process_history() {
        let (_dir, store) = setup();
        store.create("p1", "https://prov", "BPNL000TEST").await.unwrap();
        let negotiation = Negotiation {
            id: "neg-1".into(),
            state: crate::model::NegotiationState::Confirmed,
            contract_agreement_id: Some("agr-1".into()),
        };
        store
            .save_negotiation("p1", false, "negotiation", &negotiation)
            .await
            .unwrap();
        let process = store.get("p1").await.unwrap();
        assert_eq!(process.history["negotiation"].id, "neg-1");
        assert_eq!(process.history["negotiation"].status, "CONFIRMED");
    }

    #[tokio::test]
    async fn save_job_replaces_jobs_map_wholesale() {
        let (_dir, store) = setup();
        store.create("p1", "https://prov", "BPNL000TEST").await.unwrap();
        store
            .save_job("p1", "search-1", vec!["ep-1".into()])
            .await
            .unwrap();
        store
            .save_job("p1", "search-2", vec!["ep-2".into(), "ep-3".into()])
            .await
            .unwrap();
        let process = store.get("p1").await.unwrap();
        let jobs = process.jobs.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs["search-2"].endpoint_ids, vec!["ep-2", "ep-3"]);
    }
}
