//! Cancellation and per-step deadline supervision (spec §4.8, component C8).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::EngineError;
use crate::model::{History, ProcessState};
use crate::persistence::ProcessStore;
use crate::registry::ProcessRegistry;

/// User-initiated termination: set the registry's abort signal (so any
/// in-flight poll loop exits on its next check), abort the driver task as a
/// backstop, and persist `Terminated`. Idempotent: terminating an
/// already-terminal process succeeds without error.
pub async fn terminate(
    process_id: &str,
    registry: &ProcessRegistry,
    store: &ProcessStore,
) -> Result<(), EngineError> {
    registry.signal_terminate(process_id)?;
    match store.transition(process_id, ProcessState::Terminated).await {
        Ok(()) | Err(EngineError::InvalidState(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Run `fut` under a hard deadline. If it doesn't finish in time, terminate
/// the process and surface the deadline breach as `PeerUnreachable` — from
/// the caller's perspective an unresponsive counterparty and a missed
/// deadline look the same.
pub async fn with_deadline<F, T>(
    process_id: &str,
    deadline: Duration,
    registry: &ProcessRegistry,
    store: &ProcessStore,
    fut: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                process_id,
                deadline_ms = deadline.as_millis() as u64,
                "step exceeded its deadline, terminating process"
            );
            let _ = store
                .set_status(process_id, false, "timeout", History::new(process_id, "FAILED"))
                .await;
            terminate(process_id, registry, store).await?;
            Err(EngineError::PeerUnreachable(format!(
                "process {process_id} exceeded its deadline"
            )))
        }
    }
}
