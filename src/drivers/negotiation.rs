//! Contract negotiation driver (spec §4.5, component C5).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{Negotiation, Offer};
use crate::persistence::ProcessStore;
use crate::protocol_client::ProtocolClient;
use crate::registry::ProcessRegistry;

use super::poll::{poll_until_terminal, PollOutcome};

/// Drive one contract negotiation to a terminal state: start it, persist
/// the request, poll until FINALIZED/CONFIRMED (success) or
/// ERROR/TERMINATED/TERMINATING (failure), persisting the final state
/// either way.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    process_id: &str,
    counterparty_endpoint: &str,
    bpn: &str,
    offer: &Offer,
    client: &ProtocolClient,
    store: &ProcessStore,
    registry: &ProcessRegistry,
    is_registry: bool,
    step_name: &str,
    poll_interval: Duration,
) -> Result<Negotiation, EngineError> {
    let abort = registry.abort_signal(process_id).ok_or_else(|| {
        EngineError::InvalidState(format!(
            "negotiation driver started for unregistered process {process_id}"
        ))
    })?;

    let id_response = client.start_negotiation(counterparty_endpoint, bpn, offer).await?;
    store
        .save_negotiation_request(process_id, is_registry, step_name, &id_response)
        .await?;
    info!(process_id, negotiation_id = %id_response.id, "negotiation started");

    let negotiation_id = id_response.id.clone();
    let outcome = poll_until_terminal(poll_interval, &abort, || {
        let negotiation_id = negotiation_id.clone();
        async move {
            let negotiation = client.poll_negotiation(&negotiation_id).await?;
            if negotiation.state.is_terminal() {
                Ok(Some(negotiation))
            } else {
                Ok(None)
            }
        }
    })
    .await?;

    match outcome {
        PollOutcome::Aborted => Err(EngineError::Aborted),
        PollOutcome::Terminal(negotiation) => {
            store
                .save_negotiation(process_id, is_registry, step_name, &negotiation)
                .await?;
            if negotiation.state.is_terminal_success() {
                info!(process_id, negotiation_id = %negotiation.id, state = ?negotiation.state, "negotiation confirmed");
                Ok(negotiation)
            } else {
                warn!(process_id, negotiation_id = %negotiation.id, state = ?negotiation.state, "negotiation failed");
                Err(EngineError::NegotiationFailed(format!(
                    "negotiation {} ended in {:?}",
                    negotiation.id, negotiation.state
                )))
            }
        }
    }
}

/// Convenience wrapper that spawns `run` as its own task and returns the
/// handle, mirroring how per-process background work is isolated elsewhere
/// in the engine so one slow negotiation never blocks another process.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    process_id: String,
    counterparty_endpoint: String,
    bpn: String,
    offer: Offer,
    client: Arc<ProtocolClient>,
    store: Arc<ProcessStore>,
    registry: Arc<ProcessRegistry>,
    is_registry: bool,
    step_name: String,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<Result<Negotiation, EngineError>> {
    tokio::spawn(async move {
        run(
            &process_id,
            &counterparty_endpoint,
            &bpn,
            &offer,
            &client,
            &store,
            &registry,
            is_registry,
            &step_name,
            poll_interval,
        )
        .await
    })
}
