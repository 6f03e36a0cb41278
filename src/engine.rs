//! The engine facade: wires persistence, registry, and protocol client
//! together and exposes `submit`/`terminate` as the embedding surface for
//! whatever inbound trigger a deployment chooses (HTTP controller, queue
//! consumer, CLI) — that trigger itself is out of scope (spec §1).

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::drivers::{negotiation, transfer};
use crate::error::EngineError;
use crate::metrics;
use crate::model::ProcessState;
use crate::persistence::{FileHistoryJournal, FileStore, ProcessStore};
use crate::protocol_client::ProtocolClient;
use crate::registry::ProcessRegistry;
use crate::supervisor;
use crate::vault::CredentialVault;

pub struct Engine {
    config: EngineConfig,
    store: Arc<ProcessStore>,
    registry: Arc<ProcessRegistry>,
    client: Arc<ProtocolClient>,
}

impl Engine {
    pub fn new(config: EngineConfig, vault: Arc<dyn CredentialVault>) -> Result<Self, EngineError> {
        let file_store = FileStore::new(config.storage.root.clone());
        let journal = Arc::new(FileHistoryJournal::new(file_store.clone()));
        let store = Arc::new(ProcessStore::new(file_store, journal));
        let registry = Arc::new(ProcessRegistry::new());
        let client = Arc::new(ProtocolClient::new(config.edc.clone(), vault)?);
        Ok(Self {
            config,
            store,
            registry,
            client,
        })
    }

    pub fn store(&self) -> &Arc<ProcessStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Create a process and spawn its negotiation-then-transfer driver
    /// chain (spec §4.5–§4.6 sequencing) in the background. Returns the
    /// process id immediately; progress is observed through the process
    /// store's history, not this call.
    pub async fn submit(
        &self,
        id: impl Into<String>,
        counterparty_endpoint: impl Into<String>,
        bpn: impl Into<String>,
        asset_id: impl Into<String>,
    ) -> Result<String, EngineError> {
        let id = id.into();
        let counterparty_endpoint = counterparty_endpoint.into();
        let bpn = bpn.into();
        let asset_id = asset_id.into();

        self.store
            .create(id.clone(), counterparty_endpoint.clone(), bpn.clone())
            .await?;
        self.registry.register(&id);
        metrics::record_process_created();
        self.registry.set_state(&id, ProcessState::Running)?;
        self.store.transition(&id, ProcessState::Running).await?;

        let process_id = id.clone();
        let client = self.client.clone();
        let store = self.store.clone();
        let registry = self.registry.clone();
        let poll_interval = self.config.edc.poll_interval();

        tokio::spawn(async move {
            metrics::driver_started();
            let result = run_to_completion(
                &process_id,
                &counterparty_endpoint,
                &bpn,
                &asset_id,
                client,
                store.clone(),
                registry.clone(),
                poll_interval,
            )
            .await;
            metrics::driver_finished();

            match result {
                Ok(()) => {
                    metrics::record_process_completed();
                    let _ = store.transition(&process_id, ProcessState::Completed).await;
                    let _ = registry.set_state(&process_id, ProcessState::Completed);
                }
                Err(EngineError::Aborted) => {
                    // supervisor::terminate already persisted TERMINATED.
                }
                Err(err) => {
                    tracing::warn!(process_id = %process_id, error = %err, "process failed");
                    metrics::record_process_failed();
                    let _ = store.transition(&process_id, ProcessState::Failed).await;
                    let _ = registry.set_state(&process_id, ProcessState::Failed);
                }
            }
        });

        Ok(id)
    }

    /// User-initiated cancellation (spec §4.8).
    pub async fn terminate(&self, process_id: &str) -> Result<(), EngineError> {
        supervisor::terminate(process_id, &self.registry, &self.store).await?;
        metrics::record_process_terminated();
        Ok(())
    }
}

async fn run_to_completion(
    process_id: &str,
    counterparty_endpoint: &str,
    bpn: &str,
    asset_id: &str,
    client: Arc<ProtocolClient>,
    store: Arc<ProcessStore>,
    registry: Arc<ProcessRegistry>,
    poll_interval: Duration,
) -> Result<(), EngineError> {
    let catalog = client.catalog_by_filter(counterparty_endpoint, None).await?;
    let offer = ProtocolClient::find_offer_by_asset_id(&catalog, asset_id)
        .ok_or_else(|| EngineError::ProtocolError(format!("no offer found for asset {asset_id}")))?;

    let negotiation = match negotiation::run(
        process_id,
        counterparty_endpoint,
        bpn,
        &offer,
        &client,
        &store,
        &registry,
        false,
        "negotiation",
        poll_interval,
    )
    .await
    {
        Ok(negotiation) => {
            metrics::record_negotiation_outcome(true);
            negotiation
        }
        Err(err) => {
            if matches!(err, EngineError::NegotiationFailed(_)) {
                metrics::record_negotiation_outcome(false);
            }
            return Err(err);
        }
    };

    registry.set_state(process_id, ProcessState::Negotiated)?;
    store.transition(process_id, ProcessState::Negotiated).await?;

    let contract_agreement_id = negotiation.contract_agreement_id.ok_or_else(|| {
        EngineError::ProtocolError("negotiation confirmed without a contractAgreementId".into())
    })?;

    match transfer::run(
        process_id,
        counterparty_endpoint,
        bpn,
        &contract_agreement_id,
        asset_id,
        &client,
        &store,
        &registry,
        "transfer",
        poll_interval,
    )
    .await
    {
        Ok(_transfer) => {
            metrics::record_transfer_outcome(true);
            Ok(())
        }
        Err(err) => {
            if matches!(err, EngineError::TransferFailed(_)) {
                metrics::record_transfer_outcome(false);
            }
            Err(err)
        }
    }
}
