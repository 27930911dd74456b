//! MediaFlipper job runner.
//!
//! This crate provides:
//! - Worker dispatch and reconciliation of the RUNNING queue
//! - A scheduler driving both ticks, with an injectable clock
//! - Bulk enqueue and fail-pending pipelines
//! - Worker cleanup and log capture
//! - An HTTP client for the worker gateway

pub mod bulk;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http_orchestrator;
pub mod launcher;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;

pub use bulk::{BulkProcessor, EnqueueSummary, FailPendingSummary, ItemFailure, ItemFilter, JobSink};
pub use cleanup::WorkerCleanup;
pub use config::RunnerConfig;
pub use error::{RunnerError, RunnerResult};
pub use http_orchestrator::HttpOrchestrator;
pub use logging::JobLogger;
pub use orchestrator::{Label, LaunchRequest, Orchestrator, OrchestratorError, OrchestratorResult, WorkerHandle};
pub use runner::{JobRunner, QueueStats, Reconciliation, TickReport};
pub use scheduler::{Clock, ManualClock, Scheduler, SchedulerHandle, TickStats, Ticker, TokioClock};
