//! Process registry (spec §4.3, component C3).
//!
//! A single in-memory, process-wide map from process id to its current
//! scheduling state, driver task handle, and cooperative-abort flag. This
//! is deliberately separate from `ProcessStore`: the registry answers "is
//! this process still allowed to make progress" cheaply, without touching
//! the filesystem, on every poll iteration a driver runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::model::ProcessState;

struct Entry {
    state: ProcessState,
    handle: Option<JoinHandle<()>>,
    abort: Arc<AtomicBool>,
}

/// Cheap, shareable handle a driver polls to decide whether to keep going.
#[derive(Clone)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn for_test(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }
}

pub struct ProcessRegistry {
    entries: DashMap<String, Entry>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a freshly created process in `Created` state and hand back
    /// the abort signal its driver task should poll.
    pub fn register(&self, process_id: &str) -> AbortSignal {
        let abort = Arc::new(AtomicBool::new(false));
        self.entries.insert(
            process_id.to_string(),
            Entry {
                state: ProcessState::Created,
                handle: None,
                abort: abort.clone(),
            },
        );
        AbortSignal(abort)
    }

    /// Attach the spawned driver task handle so `signal_terminate` can abort it directly.
    pub fn attach(&self, process_id: &str, handle: JoinHandle<()>) -> Result<(), EngineError> {
        let mut entry = self.entries.get_mut(process_id).ok_or_else(|| {
            EngineError::InvalidState(format!("attach on unregistered process {process_id}"))
        })?;
        entry.handle = Some(handle);
        Ok(())
    }

    pub fn get_state(&self, process_id: &str) -> Option<ProcessState> {
        self.entries.get(process_id).map(|e| e.state)
    }

    pub fn abort_signal(&self, process_id: &str) -> Option<AbortSignal> {
        self.entries.get(process_id).map(|e| AbortSignal(e.abort.clone()))
    }

    /// Validated transition of the in-memory scheduling state (spec §4.3).
    pub fn set_state(&self, process_id: &str, next: ProcessState) -> Result<(), EngineError> {
        let mut entry = self.entries.get_mut(process_id).ok_or_else(|| {
            EngineError::InvalidState(format!("set_state on unregistered process {process_id}"))
        })?;
        entry.state.validate_transition(next)?;
        entry.state = next;
        Ok(())
    }

    /// Terminate a process regardless of its current state: set the abort
    /// flag so the driver's next poll-loop check exits cleanly, abort the
    /// task handle as a backstop, and mark the state `Terminated`.
    pub fn signal_terminate(&self, process_id: &str) -> Result<(), EngineError> {
        let mut entry = self.entries.get_mut(process_id).ok_or_else(|| {
            EngineError::InvalidState(format!("signal_terminate on unregistered process {process_id}"))
        })?;
        entry.abort.store(true, Ordering::SeqCst);
        if entry.state.is_terminal() {
            return Ok(());
        }
        entry.state = ProcessState::Terminated;
        if let Some(handle) = &entry.handle {
            handle.abort();
        }
        Ok(())
    }

    pub fn remove(&self, process_id: &str) {
        self.entries.remove(process_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_set_state_follows_lifecycle() {
        let registry = ProcessRegistry::new();
        registry.register("p1");
        assert_eq!(registry.get_state("p1"), Some(ProcessState::Created));
        registry.set_state("p1", ProcessState::Running).unwrap();
        assert_eq!(registry.get_state("p1"), Some(ProcessState::Running));
    }

    #[test]
    fn set_state_rejects_illegal_jump() {
        let registry = ProcessRegistry::new();
        registry.register("p1");
        assert!(matches!(
            registry.set_state("p1", ProcessState::Completed),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn set_state_on_unregistered_process_is_invalid_state() {
        let registry = ProcessRegistry::new();
        assert!(matches!(
            registry.set_state("ghost", ProcessState::Running),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn signal_terminate_sets_abort_flag_and_terminal_state() {
        let registry = ProcessRegistry::new();
        let abort = registry.register("p1");
        registry.set_state("p1", ProcessState::Running).unwrap();
        assert!(!abort.is_set());
        registry.signal_terminate("p1").unwrap();
        assert!(abort.is_set());
        assert_eq!(registry.get_state("p1"), Some(ProcessState::Terminated));
    }

    #[test]
    fn signal_terminate_on_already_terminal_process_is_a_noop_success() {
        let registry = ProcessRegistry::new();
        registry.register("p1");
        registry.set_state("p1", ProcessState::Running).unwrap();
        registry.set_state("p1", ProcessState::Completed).unwrap();
        registry.signal_terminate("p1").unwrap();
        assert_eq!(registry.get_state("p1"), Some(ProcessState::Completed));
    }
}
