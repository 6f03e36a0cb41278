//! Tracing-subscriber setup and process-scoped spans (spec §4.11, component C11).

use tracing::{Level, Span};

use crate::config::LogFormat;

/// Initialize the global tracing subscriber. Respects `RUST_LOG`, falling
/// back to `info`. Must be called once at startup before any driver runs.
pub fn init(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }
}

/// A span tagging every log line emitted while driving a process's step
/// with the process id, the step name, and the counterparty endpoint, so
/// concurrent drivers' interleaved logs stay attributable.
pub fn process_span(process_id: &str, step: &str, endpoint: &str) -> Span {
    tracing::span!(
        Level::INFO,
        "process.step",
        process_id = process_id,
        step = step,
        endpoint = endpoint,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_span_carries_expected_fields() {
        let span = process_span("p1", "negotiation", "https://prov");
        assert_eq!(span.metadata().unwrap().name(), "process.step");
    }
}
