//! Credential vault capability interface (spec §4.10).
//!
//! The protocol client depends only on this trait; the secret/credential
//! vault's actual storage backend is out of scope for this engine (spec §1).

use async_trait::async_trait;

use crate::error::EngineError;

/// Source of the API key and participant id the protocol client attaches
/// to every outbound request. Async because a production-grade vault
/// backend (e.g. a secrets manager) resolves these over the network.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn api_key(&self) -> Result<String, EngineError>;
    async fn participant_id(&self) -> Result<String, EngineError>;
}

/// A vault backed by values fixed at construction time (e.g. resolved from
/// environment variables by the caller). Lets the engine run standalone;
/// a production deployment substitutes a real vault-backed implementation
/// without any change to the protocol client or drivers.
pub struct StaticVault {
    api_key: Option<String>,
    participant_id: Option<String>,
}

impl StaticVault {
    pub fn new(api_key: Option<String>, participant_id: Option<String>) -> Self {
        Self {
            api_key,
            participant_id,
        }
    }

    /// Build a vault from `EDC_API_KEY` / `EDC_PARTICIPANT_ID` environment variables.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("EDC_API_KEY").ok(),
            participant_id: std::env::var("EDC_PARTICIPANT_ID").ok(),
        }
    }
}

#[async_trait]
impl CredentialVault for StaticVault {
    async fn api_key(&self) -> Result<String, EngineError> {
        self.api_key
            .clone()
            .ok_or_else(|| EngineError::ConfigMissing("edc.apiKey".into()))
    }

    async fn participant_id(&self) -> Result<String, EngineError> {
        self.participant_id
            .clone()
            .ok_or_else(|| EngineError::ConfigMissing("edc.participantId".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_values_surface_config_missing() {
        let vault = StaticVault::new(None, None);
        assert!(matches!(vault.api_key().await, Err(EngineError::ConfigMissing(_))));
        assert!(matches!(
            vault.participant_id().await,
            Err(EngineError::ConfigMissing(_))
        ));
    }

    #[tokio::test]
    async fn present_values_are_returned() {
        let vault = StaticVault::new(Some("key".into()), Some("BPNL000TEST".into()));
        assert_eq!(vault.api_key().await.unwrap(), "key");
        assert_eq!(vault.participant_id().await.unwrap(), "BPNL000TEST");
    }
}
