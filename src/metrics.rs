//! Prometheus metrics for the orchestration engine (spec §4.11, component C11).
//!
//! Exposed on the ambient `/metrics` HTTP endpoint (`http.rs`). Scoped to
//! process/negotiation/transfer outcomes; per-request HTTP metrics are out
//! of scope since this engine has no inbound controller surface (spec §1).

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref PROCESSES_CREATED: IntCounter = IntCounter::new(
        "engine_processes_created_total",
        "Total processes created"
    ).unwrap();

    pub static ref PROCESSES_COMPLETED: IntCounter = IntCounter::new(
        "engine_processes_completed_total",
        "Total processes that reached COMPLETED"
    ).unwrap();

    pub static ref PROCESSES_FAILED: IntCounter = IntCounter::new(
        "engine_processes_failed_total",
        "Total processes that reached FAILED"
    ).unwrap();

    pub static ref PROCESSES_TERMINATED: IntCounter = IntCounter::new(
        "engine_processes_terminated_total",
        "Total processes cancelled via TERMINATED"
    ).unwrap();

    pub static ref NEGOTIATIONS_CONFIRMED: IntCounter = IntCounter::new(
        "engine_negotiations_confirmed_total",
        "Total contract negotiations that reached a terminal-success state"
    ).unwrap();

    pub static ref NEGOTIATIONS_FAILED: IntCounter = IntCounter::new(
        "engine_negotiations_failed_total",
        "Total contract negotiations that reached a terminal-failure state"
    ).unwrap();

    pub static ref TRANSFERS_COMPLETED: IntCounter = IntCounter::new(
        "engine_transfers_completed_total",
        "Total transfer processes that reached a terminal-success state"
    ).unwrap();

    pub static ref TRANSFERS_FAILED: IntCounter = IntCounter::new(
        "engine_transfers_failed_total",
        "Total transfer processes that reached a terminal-failure state"
    ).unwrap();

    pub static ref ACTIVE_DRIVERS: IntGauge = IntGauge::new(
        "engine_active_drivers",
        "Negotiation/transfer driver tasks currently running"
    ).unwrap();
}

/// Register every metric. Call once at startup before any metric is recorded.
pub fn init() {
    REGISTRY.register(Box::new(PROCESSES_CREATED.clone())).unwrap();
    REGISTRY.register(Box::new(PROCESSES_COMPLETED.clone())).unwrap();
    REGISTRY.register(Box::new(PROCESSES_FAILED.clone())).unwrap();
    REGISTRY.register(Box::new(PROCESSES_TERMINATED.clone())).unwrap();
    REGISTRY.register(Box::new(NEGOTIATIONS_CONFIRMED.clone())).unwrap();
    REGISTRY.register(Box::new(NEGOTIATIONS_FAILED.clone())).unwrap();
    REGISTRY.register(Box::new(TRANSFERS_COMPLETED.clone())).unwrap();
    REGISTRY.register(Box::new(TRANSFERS_FAILED.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_DRIVERS.clone())).unwrap();
}

pub fn record_process_created() {
    PROCESSES_CREATED.inc();
}

pub fn record_process_completed() {
    PROCESSES_COMPLETED.inc();
}

pub fn record_process_failed() {
    PROCESSES_FAILED.inc();
}

pub fn record_process_terminated() {
    PROCESSES_TERMINATED.inc();
}

pub fn record_negotiation_outcome(success: bool) {
    if success {
        NEGOTIATIONS_CONFIRMED.inc();
    } else {
        NEGOTIATIONS_FAILED.inc();
    }
}

pub fn record_transfer_outcome(success: bool) {
    if success {
        TRANSFERS_COMPLETED.inc();
    } else {
        TRANSFERS_FAILED.inc();
    }
}

pub fn driver_started() {
    ACTIVE_DRIVERS.inc();
}

pub fn driver_finished() {
    ACTIVE_DRIVERS.dec();
}

/// Gather all metrics in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
