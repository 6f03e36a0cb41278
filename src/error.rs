//! Unified error handling for the process orchestration engine.
//!
//! Every public engine operation returns `Result<T, EngineError>`. Lower-level
//! errors (persistence, HTTP, config) are converted at the module boundary
//! via `From` impls rather than leaking their own types to callers.

use thiserror::Error;

/// The error kinds surfaced by the core engine (spec §7).
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required configuration key is unset at startup or first use.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// Network failure, or an empty body where one was required.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Response present but malformed (missing `edc:state`, unparseable JSON, ...).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Caller attempted an illegal process state transition.
    #[error("invalid state transition: {0}")]
    InvalidState(String),

    /// The history journal or process store failed to persist a write.
    #[error("storage error: {0}")]
    StorageError(String),

    /// The remote negotiation state machine entered a terminal-failure state.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The remote transfer state machine entered a terminal-failure state.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// User-initiated termination was observed; not itself a failure.
    #[error("aborted")]
    Aborted,
}

impl EngineError {
    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMissing(_) => "config_missing",
            Self::PeerUnreachable(_) => "peer_unreachable",
            Self::ProtocolError(_) => "protocol_error",
            Self::InvalidState(_) => "invalid_state",
            Self::StorageError(_) => "storage_error",
            Self::NegotiationFailed(_) => "negotiation_failed",
            Self::TransferFailed(_) => "transfer_failed",
            Self::Aborted => "aborted",
        }
    }

    /// Whether this error should drive the owning process to FAILED.
    ///
    /// `InvalidState` is reported back to the caller with the process left
    /// untouched, and `Aborted` transitions to TERMINATED rather than FAILED.
    pub fn fails_process(&self) -> bool {
        !matches!(self, Self::InvalidState(_) | Self::Aborted)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            EngineError::PeerUnreachable(err.to_string())
        } else {
            EngineError::ProtocolError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ProtocolError(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::StorageError(err.to_string())
    }
}
