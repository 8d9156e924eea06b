//! Background pass scheduler
//!
//! Runs maintenance and dream passes on fixed intervals until shutdown.
//! Passes run inline in one loop, so at most one pass is in flight.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::SchedulerConfig;
use crate::dream::DreamTrigger;
use crate::engine::{Engine, LifecycleStats};

/// Longest pass interval; larger configured values are clamped
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 3600);

/// Configured seconds as a period in `1s..=MAX_PERIOD`
fn period_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1)).min(MAX_PERIOD)
}

pub struct Scheduler<'a> {
    engine: &'a Engine,
    maintenance_every: Duration,
    dream_every: Duration,
    run_on_start: bool,
}

impl<'a> Scheduler<'a> {
    pub fn new(engine: &'a Engine, maintenance_every: Duration, dream_every: Duration, run_on_start: bool) -> Self {
        Self {
            engine,
            maintenance_every: maintenance_every.min(MAX_PERIOD),
            dream_every: dream_every.min(MAX_PERIOD),
            run_on_start,
        }
    }

    pub fn from_config(engine: &'a Engine, config: &SchedulerConfig) -> Self {
        Self::new(
            engine,
            period_from_secs(config.maintenance_interval_secs),
            period_from_secs(config.dream_interval_secs),
            config.run_on_start,
        )
    }

    fn interval(&self, period: Duration) -> Interval {
        let start = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Run until `shutdown` resolves and return the accumulated stats
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> LifecycleStats {
        let mut stats = LifecycleStats::default();
        let mut maintenance = self.interval(self.maintenance_every);
        let mut dream = self.interval(self.dream_every);
        tokio::pin!(shutdown);

        tracing::info!(
            maintenance_secs = self.maintenance_every.as_secs_f64(),
            dream_secs = self.dream_every.as_secs_f64(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = maintenance.tick() => {
                    self.engine.maintenance(Utc::now(), &mut stats).await;
                }
                _ = dream.tick() => {
                    if let Err(e) = self.engine.dream(DreamTrigger::Scheduled, None, &mut stats).await {
                        tracing::warn!(operation = "dream", error = %e, "Scheduled dream session failed to start");
                    }
                }
            }
        }

        tracing::info!(
            maintenance_runs = stats.maintenance_runs,
            dream_runs = stats.dream_runs,
            archived = stats.memories_archived,
            reforged = stats.crystals_reforged,
            "Scheduler stopped"
        );
        stats
    }
}
