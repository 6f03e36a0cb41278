//! Digital Twin Registry discovery + fan-out transfer driver (spec §4.7,
//! component C7).
//!
//! Unlike the single-asset negotiation/transfer pair, this path discovers
//! zero or more matching endpoints from the counterparty's catalog (filtered
//! by the configured registry asset type) and runs one independent
//! negotiation+transfer pair per endpoint, each under its own
//! `dtr-<endpointId>-*` journal namespace so a failure on one endpoint never
//! touches another's record. A `TERMINATED` transfer is recorded as
//! `INCOMPLETE` rather than failing the whole search (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::EngineError;
use crate::model::{Negotiation, Transfer};
use crate::persistence::ProcessStore;
use crate::protocol_client::{ProtocolClient, ASSET_TYPE_FILTER_KEY};
use crate::registry::ProcessRegistry;

use super::transfer::RegistryTransferOutcome;
use super::{negotiation, transfer};

pub struct EndpointResult {
    pub endpoint_id: String,
    pub negotiation: Negotiation,
    pub transfer: Transfer,
}

/// Discover endpoints matching `asset_type_filter`, then negotiate and
/// transfer each one concurrently. Returns only the endpoints that
/// completed successfully; endpoints that end up `INCOMPLETE` or that fail
/// outright are logged and otherwise dropped, since one bad endpoint should
/// never sink the whole search (spec §4.7 partial success).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    process_id: &str,
    counterparty_endpoint: &str,
    bpn: &str,
    search_id: &str,
    asset_type_filter: &str,
    client: Arc<ProtocolClient>,
    store: Arc<ProcessStore>,
    registry: Arc<ProcessRegistry>,
    poll_interval: Duration,
) -> Result<Vec<EndpointResult>, EngineError> {
    let catalog = client
        .catalog_by_filter(counterparty_endpoint, Some((ASSET_TYPE_FILTER_KEY, asset_type_filter)))
        .await?;
    let endpoint_ids: Vec<String> = catalog.datasets.iter().map(|d| d.asset_id.clone()).collect();
    store.save_job(process_id, search_id, endpoint_ids).await?;

    let mut handles = Vec::new();
    for dataset in &catalog.datasets {
        let Some(offer) = dataset.first_offer() else {
            continue;
        };
        let endpoint_id = dataset.asset_id.clone();
        let negotiation_step = format!("dtr-{endpoint_id}-negotiation");
        let transfer_step = format!("dtr-{endpoint_id}-transfer");
        let process_id = process_id.to_string();
        let counterparty_endpoint = counterparty_endpoint.to_string();
        let bpn = bpn.to_string();
        let client = client.clone();
        let store = store.clone();
        let registry = registry.clone();

        handles.push(tokio::spawn(async move {
            let negotiation = negotiation::run(
                &process_id,
                &counterparty_endpoint,
                &bpn,
                &offer,
                &client,
                &store,
                &registry,
                true,
                &negotiation_step,
                poll_interval,
            )
            .await?;
            let contract_agreement_id = negotiation.contract_agreement_id.clone().ok_or_else(|| {
                EngineError::ProtocolError(
                    "negotiation confirmed without a contractAgreementId".into(),
                )
            })?;
            let outcome = transfer::run_registry(
                &process_id,
                &counterparty_endpoint,
                &endpoint_id,
                &bpn,
                &contract_agreement_id,
                &offer.asset_id,
                &client,
                &store,
                &registry,
                &transfer_step,
                poll_interval,
            )
            .await?;
            let result = match outcome {
                RegistryTransferOutcome::Completed(transfer) => Some(EndpointResult {
                    endpoint_id,
                    negotiation,
                    transfer,
                }),
                RegistryTransferOutcome::Incomplete(_) => None,
            };
            Ok::<_, EngineError>(result)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(Some(result))) => results.push(result),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => warn!(process_id, error = %err, "registry endpoint driver failed"),
            Err(join_err) => {
                warn!(process_id, error = %join_err, "registry endpoint driver task did not complete")
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdcConfig;
    use crate::persistence::{FileHistoryJournal, FileStore, ProcessStore};
    use crate::vault::StaticVault;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn edc_config(base: &str) -> EdcConfig {
        EdcConfig {
            endpoint: base.to_string(),
            management: String::new(),
            catalog: "/catalog/request".to_string(),
            negotiation: "/negotiations".to_string(),
            transfer: "/transfers".to_string(),
            receiver_endpoint: "http://receiver.local/callback".to_string(),
            delay_ms: 1,
            connect_timeout_ms: 2_000,
            read_timeout_ms: 2_000,
            registry_asset_type: "digital-twin-registry".to_string(),
        }
    }

    async fn setup() -> (
        wiremock::MockServer,
        Arc<ProtocolClient>,
        Arc<ProcessStore>,
        Arc<ProcessRegistry>,
        tempfile::TempDir,
    ) {
        let server = MockServer::start().await;
        let vault = Arc::new(StaticVault::new(
            Some("test-key".to_string()),
            Some("BPNL000000000TST".to_string()),
        ));
        let client = Arc::new(ProtocolClient::new(edc_config(&server.uri()), vault).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let file_store = FileStore::new(dir.path());
        let journal = Arc::new(FileHistoryJournal::new(file_store.clone()));
        let store = Arc::new(ProcessStore::new(file_store, journal));
        let registry = Arc::new(ProcessRegistry::new());
        (server, client, store, registry, dir)
    }

    fn policy(id: &str) -> serde_json::Value {
        json!({ "@id": id, "odrl:permission": [] })
    }

    /// Scenario S5: three endpoints r1/r2/r3; r1 and r3 fully succeed, r2
    /// terminates. The search still returns r1/r3 and never drives the
    /// process itself to FAILED; r2 is recorded as INCOMPLETE.
    #[tokio::test]
    async fn partial_success_records_terminated_endpoint_as_incomplete() {
        let (server, client, store, registry, _dir) = setup().await;
        store.create("p1", "https://prov", "BPNL000000000TST").await.unwrap();
        registry.register("p1");

        Mock::given(method("POST"))
            .and(path("/catalog/request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "dcat:dataset": [
                    { "@id": "r1", "odrl:hasPolicy": [policy("pol-r1")] },
                    { "@id": "r2", "odrl:hasPolicy": [policy("pol-r2")] },
                    { "@id": "r3", "odrl:hasPolicy": [policy("pol-r3")] },
                ]
            })))
            .mount(&server)
            .await;

        // Every endpoint negotiates identically; only the transfer outcome
        // diverges per endpoint (matched on the assetId each sends).
        Mock::given(method("POST"))
            .and(path("/negotiations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "@id": "neg-any" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/negotiations/neg-any"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "edc:state": "CONFIRMED",
                "edc:contractAgreementId": "agr-any",
            })))
            .mount(&server)
            .await;

        for (endpoint, transfer_id) in [("r1", "xfer-r1"), ("r3", "xfer-r3")] {
            Mock::given(method("POST"))
                .and(path("/transfers"))
                .and(body_string_contains(format!("\"assetId\":\"{endpoint}\"")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "@id": transfer_id })))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("/transfers/{transfer_id}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "edc:state": "COMPLETED" })))
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path("/transfers"))
            .and(body_string_contains("\"assetId\":\"r2\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "@id": "xfer-r2" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transfers/xfer-r2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "edc:state": "TERMINATED" })))
            .mount(&server)
            .await;

        let results = run(
            "p1",
            "https://counterparty/api",
            "BPNL000000000TST",
            "search-1",
            "digital-twin-registry",
            client,
            store.clone(),
            registry,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        let mut returned: Vec<&str> = results.iter().map(|r| r.endpoint_id.as_str()).collect();
        returned.sort();
        assert_eq!(returned, vec!["r1", "r3"]);

        let process = store.get("p1").await.unwrap();
        assert_ne!(process.state, crate::model::ProcessState::Failed);
        assert_ne!(process.state, crate::model::ProcessState::Terminated);

        let journal = FileHistoryJournal::new(FileStore::new(_dir.path()));
        let incomplete = journal
            .read("p1", true, "dtr-r2-transfer-incomplete")
            .await
            .unwrap()
            .expect("r2 should be recorded incomplete");
        assert_eq!(incomplete.status, "INCOMPLETE");
        assert!(journal
            .read("p1", true, "dtr-r1-transfer-incomplete")
            .await
            .unwrap()
            .is_none());
    }
}
