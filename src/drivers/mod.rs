//! Drivers: the per-process background tasks that make progress against
//! the counterparty (spec §4.5–§4.7, components C5–C7).

pub mod negotiation;
pub mod poll;
pub mod registry_transfer;
pub mod transfer;

pub use poll::{poll_until_terminal, PollOutcome};
