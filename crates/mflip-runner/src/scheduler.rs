//! Periodic ticks.
//!
//! The scheduler runs the clear-completed and waiting-queue ticks as two
//! independent loops, each on its own timer. A failed tick is logged and
//! the loop carries on with the next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::RunnerResult;
use crate::metrics;
use crate::runner::JobRunner;

/// Source of tick timers.
pub trait Clock: Send + Sync {
    fn ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick.
    async fn tick(&mut self);
}

/// Wall-clock timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

struct TokioTicker(tokio::time::Interval);

#[async_trait]
impl Ticker for TokioTicker {
    async fn tick(&mut self) {
        self.0.tick().await;
    }
}

impl Clock for TokioClock {
    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let mut interval = tokio::time::interval(period);
        // Missed ticks are delayed, never bunched up
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(TokioTicker(interval))
    }
}

/// Timers that only fire when told to. Every ticker fires once per
/// [`ManualClock::advance`], whatever its period.
#[derive(Debug, Clone)]
pub struct ManualClock {
    tx: broadcast::Sender<()>,
}

impl ManualClock {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn advance(&self) {
        // no receivers just means no ticker was created yet
        let _ = self.tx.send(());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

struct ManualTicker(broadcast::Receiver<()>);

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        loop {
            match self.0.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

impl Clock for ManualClock {
    fn ticker(&self, _period: Duration) -> Box<dyn Ticker> {
        Box::new(ManualTicker(self.tx.subscribe()))
    }
}

/// Tick counters, shared with the running loops.
#[derive(Debug, Default)]
pub struct TickStats {
    pub clear_completed: AtomicU64,
    pub waiting: AtomicU64,
    pub failed: AtomicU64,
}

impl TickStats {
    pub fn clear_completed_ticks(&self) -> u64 {
        self.clear_completed.load(Ordering::SeqCst)
    }

    pub fn waiting_ticks(&self) -> u64 {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickKind {
    ClearCompleted,
    Waiting,
}

impl TickKind {
    fn as_str(&self) -> &'static str {
        match self {
            TickKind::ClearCompleted => "clear_completed",
            TickKind::Waiting => "waiting",
        }
    }
}

pub struct Scheduler {
    runner: Arc<JobRunner>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<JobRunner>, clock: Arc<dyn Clock>) -> Self {
        let interval = runner.config().poll_interval;
        Self {
            runner,
            clock,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn both tick loops.
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let stats = Arc::new(TickStats::default());

        let tasks = [TickKind::ClearCompleted, TickKind::Waiting]
            .into_iter()
            .map(|kind| {
                tokio::spawn(tick_loop(
                    kind,
                    self.runner.clone(),
                    self.clock.ticker(self.interval),
                    stop_rx.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        info!(interval_ms = self.interval.as_millis() as u64, "Scheduler started");
        SchedulerHandle {
            stop: stop_tx,
            tasks,
            stats,
        }
    }
}

async fn run_tick(kind: TickKind, runner: &JobRunner) -> RunnerResult<()> {
    match kind {
        TickKind::ClearCompleted => {
            let report = runner.clear_completed_tick().await?;
            if report.checked > 0 {
                debug!(?report, "Reconciled running queue");
            }
        }
        TickKind::Waiting => {
            let dispatched = runner.waiting_queue_tick().await?;
            if dispatched > 0 {
                debug!(dispatched, "Started waiting containers");
            }
        }
    }
    Ok(())
}

async fn tick_loop(
    kind: TickKind,
    runner: Arc<JobRunner>,
    mut ticker: Box<dyn Ticker>,
    mut stop: watch::Receiver<bool>,
    stats: Arc<TickStats>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        // A tick in progress always runs to completion
        if let Err(e) = run_tick(kind, &runner).await {
            error!(tick = kind.as_str(), "Tick failed: {}", e);
            metrics::record_tick_failure(kind.as_str());
            stats.failed.fetch_add(1, Ordering::SeqCst);
        }

        let counter = match kind {
            TickKind::ClearCompleted => &stats.clear_completed,
            TickKind::Waiting => &stats.waiting,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
    debug!(tick = kind.as_str(), "Tick loop stopped");
}

pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<TickStats>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> Arc<TickStats> {
        self.stats.clone()
    }

    /// Stop both loops, waiting for any tick in progress.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for result in futures_util::future::join_all(self.tasks).await {
            if let Err(e) = result {
                error!("Tick loop panicked: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}
