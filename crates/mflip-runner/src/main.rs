//! Job runner binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mflip_queue::QueueError;
use mflip_runner::{metrics, HttpOrchestrator, JobRunner, RunnerConfig, RunnerResult, Scheduler, TokioClock};
use mflip_store::{KeySpace, RedisStore};
use mflip_templates::{JobTemplateManager, TemplateResolver, TranscodeSettingsManager};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting mflip-runner");

    let config = RunnerConfig::from_env();
    info!("Runner config: {:?}", config);

    if let Err(e) = run(config).await {
        error!("Runner error: {}", e);
        std::process::exit(1);
    }

    info!("Runner shutdown complete");
}

async fn run(config: RunnerConfig) -> RunnerResult<()> {
    metrics::init_metrics(config.metrics_port)?;

    let store = RedisStore::connect(&config.redis_url)
        .await
        .map_err(QueueError::from)?;
    let keys = KeySpace::new(config.key_prefix.clone());
    let orchestrator = HttpOrchestrator::from_config(&config)?;

    // A bad definition file stops the runner before any tick
    let settings = match &config.settings_path {
        Some(path) => TranscodeSettingsManager::load(path)?,
        None => TranscodeSettingsManager::default(),
    };
    if let Some(path) = &config.templates_path {
        let templates = JobTemplateManager::load(path, settings)?;
        info!(count = templates.list_templates().len(), "Job templates validated");
    }

    let runner = Arc::new(JobRunner::new(
        Arc::new(store),
        keys,
        Arc::new(orchestrator),
        config,
    ));
    let stats = runner.queue_stats().await?;
    info!(waiting = stats.waiting, running = stats.running, "Connected to queue store");

    let handle = Scheduler::new(runner, Arc::new(TokioClock)).start();

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    handle.stop().await;
    Ok(())
}
