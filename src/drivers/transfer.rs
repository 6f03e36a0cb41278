//! Data transfer driver (spec §4.6, component C6, and the registry-path
//! variant in §4.7, component C7).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{History, Transfer, TransferState};
use crate::persistence::ProcessStore;
use crate::protocol_client::ProtocolClient;
use crate::registry::ProcessRegistry;

use super::poll::{poll_until_terminal, PollOutcome};

/// Outcome of the registry-path transfer driver. A `Terminated` final state
/// on this path is not a hard failure (spec §4.7): it's recorded as
/// `INCOMPLETE` so one bad endpoint never sinks the others.
pub enum RegistryTransferOutcome {
    Completed(Transfer),
    Incomplete(Transfer),
}

/// Start a transfer and poll it to a terminal state, without yet deciding
/// what a non-success terminal state means to the caller.
#[allow(clippy::too_many_arguments)]
async fn start_and_poll(
    process_id: &str,
    counterparty_endpoint: &str,
    endpoint_id: Option<&str>,
    bpn: &str,
    contract_agreement_id: &str,
    asset_id: &str,
    client: &ProtocolClient,
    store: &ProcessStore,
    registry: &ProcessRegistry,
    is_registry: bool,
    step_name: &str,
    poll_interval: Duration,
) -> Result<Transfer, EngineError> {
    let abort = registry.abort_signal(process_id).ok_or_else(|| {
        EngineError::InvalidState(format!(
            "transfer driver started for unregistered process {process_id}"
        ))
    })?;

    let id_response = client
        .start_transfer(
            counterparty_endpoint,
            process_id,
            endpoint_id,
            bpn,
            contract_agreement_id,
            asset_id,
        )
        .await?;
    store
        .save_transfer_request(process_id, is_registry, step_name, &id_response)
        .await?;
    info!(process_id, transfer_id = %id_response.id, "transfer started");

    let transfer_id = id_response.id.clone();
    let outcome = poll_until_terminal(poll_interval, &abort, || {
        let transfer_id = transfer_id.clone();
        async move {
            let transfer = client.poll_transfer(&transfer_id).await?;
            if transfer.state.is_terminal() {
                Ok(Some(transfer))
            } else {
                Ok(None)
            }
        }
    })
    .await?;

    match outcome {
        PollOutcome::Aborted => Err(EngineError::Aborted),
        PollOutcome::Terminal(transfer) => {
            store
                .save_transfer(process_id, is_registry, step_name, &transfer)
                .await?;
            Ok(transfer)
        }
    }
}

/// Drive one transfer process to a terminal state on the main (non-registry)
/// path: any non-success terminal state is a hard failure for the process.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    process_id: &str,
    counterparty_endpoint: &str,
    bpn: &str,
    contract_agreement_id: &str,
    asset_id: &str,
    client: &ProtocolClient,
    store: &ProcessStore,
    registry: &ProcessRegistry,
    step_name: &str,
    poll_interval: Duration,
) -> Result<Transfer, EngineError> {
    let transfer = start_and_poll(
        process_id,
        counterparty_endpoint,
        None,
        bpn,
        contract_agreement_id,
        asset_id,
        client,
        store,
        registry,
        false,
        step_name,
        poll_interval,
    )
    .await?;

    if transfer.state.is_terminal_success() {
        info!(process_id, transfer_id = %transfer.id, state = ?transfer.state, "transfer completed");
        Ok(transfer)
    } else {
        warn!(process_id, transfer_id = %transfer.id, state = ?transfer.state, "transfer failed");
        Err(EngineError::TransferFailed(format!(
            "transfer {} ended in {:?}",
            transfer.id, transfer.state
        )))
    }
}

/// Drive one transfer process on the registry discovery path (spec §4.7).
/// `endpoint_id` is threaded into the callback URL so the receiver can
/// demultiplex parallel transfers for the same process, and into the
/// `-incomplete` journal step name on a `TERMINATED` final state.
#[allow(clippy::too_many_arguments)]
pub async fn run_registry(
    process_id: &str,
    counterparty_endpoint: &str,
    endpoint_id: &str,
    bpn: &str,
    contract_agreement_id: &str,
    asset_id: &str,
    client: &ProtocolClient,
    store: &ProcessStore,
    registry: &ProcessRegistry,
    step_name: &str,
    poll_interval: Duration,
) -> Result<RegistryTransferOutcome, EngineError> {
    let transfer = start_and_poll(
        process_id,
        counterparty_endpoint,
        Some(endpoint_id),
        bpn,
        contract_agreement_id,
        asset_id,
        client,
        store,
        registry,
        true,
        step_name,
        poll_interval,
    )
    .await?;

    if transfer.state.is_terminal_success() {
        info!(process_id, transfer_id = %transfer.id, state = ?transfer.state, "registry transfer completed");
        return Ok(RegistryTransferOutcome::Completed(transfer));
    }

    if transfer.state == TransferState::Terminated {
        let incomplete_step = format!("{step_name}-incomplete");
        store
            .set_status(process_id, true, &incomplete_step, History::new(transfer.id.clone(), "INCOMPLETE"))
            .await?;
        warn!(process_id, endpoint_id, transfer_id = %transfer.id, "registry transfer incomplete");
        return Ok(RegistryTransferOutcome::Incomplete(transfer));
    }

    warn!(process_id, endpoint_id, transfer_id = %transfer.id, state = ?transfer.state, "registry transfer failed");
    Err(EngineError::TransferFailed(format!(
        "transfer {} ended in {:?}",
        transfer.id, transfer.state
    )))
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    process_id: String,
    counterparty_endpoint: String,
    bpn: String,
    contract_agreement_id: String,
    asset_id: String,
    client: Arc<ProtocolClient>,
    store: Arc<ProcessStore>,
    registry: Arc<ProcessRegistry>,
    step_name: String,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<Result<Transfer, EngineError>> {
    tokio::spawn(async move {
        run(
            &process_id,
            &counterparty_endpoint,
            &bpn,
            &contract_agreement_id,
            &asset_id,
            &client,
            &store,
            &registry,
            &step_name,
            poll_interval,
        )
        .await
    })
}
