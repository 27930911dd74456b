//! Prometheus metrics for the runner.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use mflip_models::StepKind;
use mflip_queue::QueueName;

use crate::error::{RunnerError, RunnerResult};

/// Install the Prometheus recorder and serve `/metrics` on `port`.
pub fn init_metrics(port: u16) -> RunnerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| RunnerError::config(format!("could not start metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Steps
    pub const STEPS_DISPATCHED_TOTAL: &str = "mflip_steps_dispatched_total";
    pub const DISPATCH_FAILURES_TOTAL: &str = "mflip_dispatch_failures_total";
    pub const STEPS_FINISHED_TOTAL: &str = "mflip_steps_finished_total";

    // Ticks
    pub const TICK_DURATION_SECONDS: &str = "mflip_tick_duration_seconds";
    pub const TICK_FAILURES_TOTAL: &str = "mflip_tick_failures_total";

    // Queues
    pub const QUEUE_LENGTH: &str = "mflip_queue_length";

    // Bulk
    pub const BULK_ITEMS_ENQUEUED_TOTAL: &str = "mflip_bulk_items_enqueued_total";
    pub const BULK_ITEMS_SKIPPED_TOTAL: &str = "mflip_bulk_items_skipped_total";
}

pub fn record_step_dispatched(kind: StepKind) {
    counter!(names::STEPS_DISPATCHED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_dispatch_failure(kind: StepKind) {
    counter!(names::DISPATCH_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// `outcome` is one of `completed`, `failed` or `lost`.
pub fn record_step_finished(outcome: &'static str) {
    counter!(names::STEPS_FINISHED_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_tick(tick: &'static str, duration_secs: f64) {
    histogram!(names::TICK_DURATION_SECONDS, "tick" => tick).record(duration_secs);
}

pub fn record_tick_failure(tick: &'static str) {
    counter!(names::TICK_FAILURES_TOTAL, "tick" => tick).increment(1);
}

pub fn set_queue_length(queue: QueueName, length: u64) {
    gauge!(names::QUEUE_LENGTH, "queue" => queue.as_str()).set(length as f64);
}

pub fn record_bulk_items(enqueued: u64, skipped: u64) {
    counter!(names::BULK_ITEMS_ENQUEUED_TOTAL).increment(enqueued);
    counter!(names::BULK_ITEMS_SKIPPED_TOTAL).increment(skipped);
}
