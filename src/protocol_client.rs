//! Dataspace management-plane protocol client (spec §4.4, component C4).
//!
//! Talks to the counterparty's management API: catalog request, contract
//! negotiation, and transfer process endpoints. Every call attaches the
//! `X-Api-Key` header from the configured `CredentialVault` and enforces
//! the configured connect/read timeouts explicitly, mirroring the way the
//! RBL client wraps each outbound call in its own `tokio::time::timeout`
//! rather than relying solely on the client builder's defaults.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::EdcConfig;
use crate::error::EngineError;
use crate::model::{Catalog, Dataset, IdResponse, Negotiation, NegotiationState, Offer, Policy, Transfer, TransferState};
use crate::vault::CredentialVault;

const ODRL_CONTEXT: &str = "http://www.w3.org/ns/odrl/2/";

/// Filter key used for the registry-discovery catalog query (spec §4.7).
pub const ASSET_TYPE_FILTER_KEY: &str = "https://w3id.org/edc/v0.0.1/ns/type";

pub struct ProtocolClient {
    http: reqwest::Client,
    config: EdcConfig,
    vault: Arc<dyn CredentialVault>,
}

impl ProtocolClient {
    pub fn new(config: EdcConfig, vault: Arc<dyn CredentialVault>) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(EngineError::from)?;
        Ok(Self { http, config, vault })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, EngineError> {
        let api_key = self.vault.api_key().await?;
        let response = tokio::time::timeout(
            self.config.read_timeout(),
            self.http
                .post(url)
                .header("X-Api-Key", api_key)
                .json(body)
                .send(),
        )
        .await
        .map_err(|_| EngineError::PeerUnreachable(format!("timed out calling {url}")))??;

        if !response.status().is_success() {
            return Err(EngineError::ProtocolError(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(response.json::<Value>().await?)
    }

    async fn get(&self, url: &str) -> Result<Value, EngineError> {
        let api_key = self.vault.api_key().await?;
        let response = tokio::time::timeout(
            self.config.read_timeout(),
            self.http.get(url).header("X-Api-Key", api_key).send(),
        )
        .await
        .map_err(|_| EngineError::PeerUnreachable(format!("timed out calling {url}")))??;

        if !response.status().is_success() {
            return Err(EngineError::ProtocolError(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(response.json::<Value>().await?)
    }

    /// Issue an empty catalog query and return the counterparty's
    /// participant identifier (spec §4.4). Distinguishes an unreachable
    /// peer (no body at all) from a reachable peer whose response is
    /// missing the field we need.
    pub async fn participant_id(&self, counterparty_endpoint: &str) -> Result<String, EngineError> {
        let url = self.config.catalog_url();
        let api_key = self.vault.api_key().await?;
        let body = json!({
            "@context": { "odrl": ODRL_CONTEXT },
            "counterPartyAddress": counterparty_endpoint,
        });
        let response = tokio::time::timeout(
            self.config.read_timeout(),
            self.http.post(&url).header("X-Api-Key", api_key).json(&body).send(),
        )
        .await
        .map_err(|_| EngineError::PeerUnreachable(format!("timed out calling {url}")))??;

        if !response.status().is_success() {
            return Err(EngineError::ProtocolError(format!("{url} returned {}", response.status())));
        }
        let text = response.text().await.map_err(EngineError::from)?;
        if text.trim().is_empty() {
            return Err(EngineError::PeerUnreachable(format!("{url} returned an empty body")));
        }
        let raw: Value = serde_json::from_str(&text)?;
        raw.get("participantId")
            .or_else(|| raw.get("edc:participantId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::ProtocolError("catalog response missing participant id".into()))
    }

    /// Request the counterparty's catalog, optionally filtered by a single
    /// equality expression `leftOperand = rightOperand` (used by the
    /// registry-discovery path, spec §4.7).
    pub async fn catalog_by_filter(
        &self,
        counterparty_endpoint: &str,
        filter: Option<(&str, &str)>,
    ) -> Result<Catalog, EngineError> {
        let mut body = json!({
            "@context": { "odrl": ODRL_CONTEXT },
            "counterPartyAddress": counterparty_endpoint,
        });
        if let Some((key, value)) = filter {
            body["querySpec"] = json!({
                "filterExpression": [{
                    "leftOperand": key,
                    "operator": "=",
                    "rightOperand": value,
                }]
            });
        }
        let raw = self.post(&self.config.catalog_url(), &body).await?;
        parse_catalog(&raw)
    }

    /// Select the first offer for `asset_id` in an already-fetched catalog
    /// (spec §4.5 step 1: first policy wins on conflict).
    pub fn find_offer_by_asset_id(catalog: &Catalog, asset_id: &str) -> Option<Offer> {
        catalog
            .datasets
            .iter()
            .find(|d| d.asset_id == asset_id)
            .and_then(Dataset::first_offer)
    }

    pub async fn start_negotiation(
        &self,
        counterparty_endpoint: &str,
        bpn: &str,
        offer: &Offer,
    ) -> Result<IdResponse, EngineError> {
        let proposal = offer.policy.with_id_cleared();
        let body = json!({
            "@context": { "odrl": ODRL_CONTEXT },
            "counterPartyAddress": counterparty_endpoint,
            "counterPartyId": bpn,
            "offer": {
                "offerId": offer.offer_id,
                "assetId": offer.asset_id,
                "policy": proposal,
            },
        });
        let raw = self.post(&self.config.negotiation_url(), &body).await?;
        let id: IdResponse = serde_json::from_value(raw)?;
        debug!(negotiation_id = %id.id, "started contract negotiation");
        Ok(id)
    }

    pub async fn poll_negotiation(&self, negotiation_id: &str) -> Result<Negotiation, EngineError> {
        let url = format!("{}/{negotiation_id}", self.config.negotiation_url());
        let raw = self.get(&url).await?;
        let state = extract_state(&raw)?;
        let contract_agreement_id = raw
            .get("edc:contractAgreementId")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Negotiation {
            id: negotiation_id.to_string(),
            state,
            contract_agreement_id,
        })
    }

    /// `endpoint_id` is `Some` only on the registry discovery path (spec
    /// §4.7), which appends a second callback-path segment so the receiver
    /// can demultiplex multiple parallel registry fetches for one process.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_transfer(
        &self,
        counterparty_endpoint: &str,
        process_id: &str,
        endpoint_id: Option<&str>,
        bpn: &str,
        contract_agreement_id: &str,
        asset_id: &str,
    ) -> Result<IdResponse, EngineError> {
        let callback_url = match endpoint_id {
            Some(endpoint_id) => format!("{}/{process_id}/{endpoint_id}", self.config.receiver_endpoint),
            None => format!("{}/{process_id}", self.config.receiver_endpoint),
        };
        let body = json!({
            "@context": { "odrl": ODRL_CONTEXT },
            "assetId": asset_id,
            "counterPartyAddress": counterparty_endpoint,
            "counterPartyId": bpn,
            "contractId": contract_agreement_id,
            "dataDestination": { "type": "HttpProxy" },
            "managedResources": false,
            "privateProperties": { "receiverHttpEndpoint": callback_url },
            "protocol": "dataspace-protocol-http",
            "transferType": { "contentType": "application/octet-stream", "isFinite": true },
        });
        let raw = self.post(&self.config.transfer_url(), &body).await?;
        let id: IdResponse = serde_json::from_value(raw)?;
        debug!(transfer_id = %id.id, "started transfer process");
        Ok(id)
    }

    pub async fn poll_transfer(&self, transfer_id: &str) -> Result<Transfer, EngineError> {
        let url = format!("{}/{transfer_id}", self.config.transfer_url());
        let raw = self.get(&url).await?;
        let state = extract_transfer_state(&raw)?;
        Ok(Transfer {
            id: transfer_id.to_string(),
            state,
        })
    }
}

fn extract_state(raw: &Value) -> Result<NegotiationState, EngineError> {
    let label = raw
        .get("edc:state")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::ProtocolError("response missing edc:state".into()))?;
    NegotiationState::from_edc_state(label).ok_or_else(|| {
        warn!(state = %label, "unrecognized negotiation state from counterparty");
        EngineError::ProtocolError(format!("unrecognized negotiation state: {label}"))
    })
}

fn extract_transfer_state(raw: &Value) -> Result<TransferState, EngineError> {
    let label = raw
        .get("edc:state")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::ProtocolError("response missing edc:state".into()))?;
    TransferState::from_edc_state(label).ok_or_else(|| {
        warn!(state = %label, "unrecognized transfer state from counterparty");
        EngineError::ProtocolError(format!("unrecognized transfer state: {label}"))
    })
}

/// Parse a DCAT catalog response into the subset this engine cares about:
/// one `Dataset` per `dcat:dataset` entry, carrying its offered policies.
fn parse_catalog(raw: &Value) -> Result<Catalog, EngineError> {
    let datasets_value = raw.get("dcat:dataset").cloned().unwrap_or(Value::Null);
    let entries: Vec<Value> = match datasets_value {
        Value::Array(items) => items,
        Value::Object(_) => vec![datasets_value],
        Value::Null => Vec::new(),
        other => {
            return Err(EngineError::ProtocolError(format!(
                "unexpected dcat:dataset shape: {other}"
            )))
        }
    };

    let mut datasets = Vec::with_capacity(entries.len());
    for entry in entries {
        let asset_id = entry
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ProtocolError("dataset missing @id".into()))?
            .to_string();

        let policies_value = entry.get("odrl:hasPolicy").cloned().unwrap_or(Value::Null);
        let policy_entries: Vec<Value> = match policies_value {
            Value::Array(items) => items,
            Value::Object(_) => vec![policies_value],
            Value::Null => Vec::new(),
            other => {
                return Err(EngineError::ProtocolError(format!(
                    "unexpected odrl:hasPolicy shape: {other}"
                )))
            }
        };
        let policies = policy_entries
            .into_iter()
            .map(|p| serde_json::from_value::<Policy>(p).map_err(EngineError::from))
            .collect::<Result<Vec<_>, _>>()?;

        datasets.push(Dataset { asset_id, policies });
    }
    Ok(Catalog { datasets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::StaticVault;
    use std::sync::Arc as StdArc;
    use wiremock::matchers::{method, path};
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

    fn client(base: &str) -> ProtocolClient {
        let vault = StdArc::new(StaticVault::new(Some("key".into()), Some("BPNL000TEST".into())));
        ProtocolClient::new(edc_config(base), vault).unwrap()
    }

    #[tokio::test]
    async fn participant_id_returns_the_field_from_an_empty_catalog_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/catalog/request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "participantId": "BPNL000PEER" })))
            .mount(&server)
            .await;
        let result = client(&server.uri()).participant_id("https://peer/api").await.unwrap();
        assert_eq!(result, "BPNL000PEER");
    }

    #[tokio::test]
    async fn participant_id_is_peer_unreachable_on_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/catalog/request"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;
        let result = client(&server.uri()).participant_id("https://peer/api").await;
        assert!(matches!(result, Err(EngineError::PeerUnreachable(_))));
    }

    #[tokio::test]
    async fn participant_id_is_protocol_error_when_field_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/catalog/request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "@type": "dcat:Catalog" })))
            .mount(&server)
            .await;
        let result = client(&server.uri()).participant_id("https://peer/api").await;
        assert!(matches!(result, Err(EngineError::ProtocolError(_))));
    }

    #[test]
    fn parse_catalog_handles_single_dataset_object_and_single_policy_object() {
        let raw = json!({
            "dcat:dataset": {
                "@id": "urn:uuid:asset-1",
                "odrl:hasPolicy": { "@id": "pol-1", "odrl:permission": [] }
            }
        });
        let catalog = parse_catalog(&raw).unwrap();
        assert_eq!(catalog.datasets.len(), 1);
        assert_eq!(catalog.datasets[0].asset_id, "urn:uuid:asset-1");
        assert_eq!(catalog.datasets[0].policies[0].id, "pol-1");
    }

    #[test]
    fn parse_catalog_handles_array_of_datasets() {
        let raw = json!({
            "dcat:dataset": [
                { "@id": "a1", "odrl:hasPolicy": [{ "@id": "p1" }] },
                { "@id": "a2", "odrl:hasPolicy": [{ "@id": "p2" }] },
            ]
        });
        let catalog = parse_catalog(&raw).unwrap();
        assert_eq!(catalog.datasets.len(), 2);
        assert_eq!(catalog.datasets[1].asset_id, "a2");
    }

    #[test]
    fn parse_catalog_with_no_datasets_is_empty() {
        let raw = json!({ "@type": "dcat:Catalog" });
        let catalog = parse_catalog(&raw).unwrap();
        assert!(catalog.datasets.is_empty());
    }

    #[test]
    fn find_offer_by_asset_id_picks_first_policy() {
        let catalog = Catalog {
            datasets: vec![Dataset {
                asset_id: "a1".into(),
                policies: vec![
                    Policy {
                        id: "p1".into(),
                        body: serde_json::Map::new(),
                    },
                    Policy {
                        id: "p2".into(),
                        body: serde_json::Map::new(),
                    },
                ],
            }],
        };
        let offer = ProtocolClient::find_offer_by_asset_id(&catalog, "a1").unwrap();
        assert_eq!(offer.offer_id, "p1");
    }

    #[test]
    fn extract_state_rejects_unrecognized_label() {
        let raw = json!({ "edc:state": "SOMETHING_NEW" });
        assert!(matches!(extract_state(&raw), Err(EngineError::ProtocolError(_))));
    }

    #[test]
    fn extract_state_rejects_missing_field() {
        let raw = json!({});
        assert!(matches!(extract_state(&raw), Err(EngineError::ProtocolError(_))));
    }
}
