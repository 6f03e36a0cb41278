//! Core data model: processes, history entries, and the remote-observed
//! negotiation/transfer/catalog value objects (spec §3).

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current epoch milliseconds, used for `createdAt`/`modifiedAt`/history timestamps.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lifecycle state of a `Process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    Running,
    Negotiated,
    Completed,
    Failed,
    Terminated,
}

impl ProcessState {
    /// Whether this state is terminal: no further driver should run for it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// Validate a state transition against the process lifecycle (spec §3,
    /// §4.3). `Terminated` is reachable from any non-terminal state (user
    /// cancellation); `Failed` likewise. Forward progress otherwise only
    /// moves `Created -> Running -> Negotiated -> Completed`.
    pub fn validate_transition(self, next: ProcessState) -> Result<(), crate::error::EngineError> {
        use ProcessState::*;
        let allowed = match (self, next) {
            (_, Terminated) | (_, Failed) => !self.is_terminal(),
            (Created, Running) => true,
            (Running, Negotiated) => true,
            (Negotiated, Completed) => true,
            (a, b) if a == b => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(crate::error::EngineError::InvalidState(format!(
                "cannot transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// One event in a process's journal (spec §3 "History entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    /// Identifier of the object the event pertains to (negotiation id, transfer id, step name).
    pub id: String,
    /// Short label, e.g. "NEGOTIATED", "TRANSFERRED", "FAILED", "INCOMPLETE".
    pub status: String,
    pub started: i64,
    pub updated: i64,
}

impl History {
    /// Construct a fresh entry where `started` and `updated` are both "now".
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            status: status.into(),
            started: now,
            updated: now,
        }
    }
}

/// A record of a registry search job, keyed by search id on `Process::jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
    pub search_id: String,
    pub endpoint_ids: Vec<String>,
    pub started: i64,
    pub updated: i64,
}

/// The unit of work the engine owns (spec §3 "Process").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub state: ProcessState,
    pub created_at: i64,
    pub modified_at: i64,
    pub endpoint: String,
    pub bpn: String,
    /// Registry-path job history, keyed by search id. Always replaced
    /// wholesale on write, never mutated in place through a shared
    /// reference (see DESIGN.md open-question resolution).
    pub jobs: Option<HashMap<String, JobHistory>>,
    pub history: HashMap<String, History>,
    /// Opaque to the core; carried through unchanged for the tree-navigation feature.
    pub tree_state: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

impl Process {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, bpn: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            state: ProcessState::Created,
            created_at: now,
            modified_at: now,
            endpoint: endpoint.into(),
            bpn: bpn.into(),
            jobs: None,
            history: HashMap::new(),
            tree_state: None,
            children: Vec::new(),
        }
    }

    /// Record a history entry under `step_name`, bumping `modified_at`.
    ///
    /// `started` is preserved from any prior entry under the same step name
    /// (the journal, not the in-memory copy, is the authority for this —
    /// callers that go through `ProcessStore` get this for free).
    pub fn record(&mut self, step_name: impl Into<String>, entry: History) {
        self.history.insert(step_name.into(), entry);
        self.modified_at = now_millis();
    }
}

/// Terminal-success/terminal-failure classification for negotiation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    Requested,
    Negotiating,
    Agreed,
    Verifying,
    Finalized,
    Confirmed,
    Terminating,
    Terminated,
    Error,
}

impl NegotiationState {
    pub fn from_edc_state(s: &str) -> Option<Self> {
        Some(match s {
            "REQUESTED" => Self::Requested,
            "NEGOTIATING" => Self::Negotiating,
            "AGREED" => Self::Agreed,
            "VERIFYING" => Self::Verifying,
            "FINALIZED" => Self::Finalized,
            "CONFIRMED" => Self::Confirmed,
            "TERMINATING" => Self::Terminating,
            "TERMINATED" => Self::Terminated,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    pub fn as_edc_state(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Negotiating => "NEGOTIATING",
            Self::Agreed => "AGREED",
            Self::Verifying => "VERIFYING",
            Self::Finalized => "FINALIZED",
            Self::Confirmed => "CONFIRMED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal_success(self) -> bool {
        matches!(self, Self::Confirmed | Self::Finalized)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Error | Self::Terminated | Self::Terminating)
    }

    pub fn is_terminal(self) -> bool {
        self.is_terminal_success() || self.is_terminal_failure()
    }
}

/// Remote-observed negotiation (spec §3 "Negotiation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: String,
    pub state: NegotiationState,
    pub contract_agreement_id: Option<String>,
}

/// Terminal-success/terminal-failure classification for transfer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Requested,
    Started,
    Completed,
    Verified,
    Finalized,
    Terminating,
    Terminated,
    Error,
}

impl TransferState {
    pub fn from_edc_state(s: &str) -> Option<Self> {
        Some(match s {
            "REQUESTED" => Self::Requested,
            "STARTED" => Self::Started,
            "COMPLETED" => Self::Completed,
            "VERIFIED" => Self::Verified,
            "FINALIZED" => Self::Finalized,
            "TERMINATING" => Self::Terminating,
            "TERMINATED" => Self::Terminated,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    pub fn as_edc_state(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Verified => "VERIFIED",
            Self::Finalized => "FINALIZED",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal_success(self) -> bool {
        matches!(self, Self::Completed | Self::Verified | Self::Finalized)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Error | Self::Terminated | Self::Terminating)
    }

    pub fn is_terminal(self) -> bool {
        self.is_terminal_success() || self.is_terminal_failure()
    }
}

/// Remote-observed transfer (spec §3 "Transfer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub state: TransferState,
}

/// An ODRL policy as echoed back by the catalog. Opaque beyond its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl Policy {
    /// A copy of this policy with its id cleared, as embedded in the
    /// agreement proposal sent to `startNegotiation` (spec §4.5 step 1).
    pub fn with_id_cleared(&self) -> Policy {
        Policy {
            id: String::new(),
            body: self.body.clone(),
        }
    }
}

/// A catalog-advertised asset plus its offer policies (spec §3 "Dataset").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub asset_id: String,
    pub policies: Vec<Policy>,
}

impl Dataset {
    /// The engine's chosen Offer: first policy on conflict (spec §4.5 step 1).
    pub fn first_offer(&self) -> Option<Offer> {
        self.policies.first().map(|policy| Offer {
            offer_id: policy.id.clone(),
            asset_id: self.asset_id.clone(),
            policy: policy.clone(),
        })
    }
}

/// The projection the engine sends back to the counterparty: one assetId
/// paired with one chosen policy (spec §3 "Offer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub asset_id: String,
    pub policy: Policy,
}

/// A parsed catalog response (only the parts this engine consumes).
#[derive(Debug, Clone)]
pub struct Catalog {
    pub datasets: Vec<Dataset>,
}

/// Opaque identifier returned by `startNegotiation`/`startTransfer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdResponse {
    #[serde(rename = "@id")]
    pub id: String,
}
