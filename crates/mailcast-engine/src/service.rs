//! `Mailcast`: the two entry points plus stats and deactivation behind one handle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use mailcast_core::config::MailcastConfig;
use mailcast_core::error::Result;
use mailcast_core::traits::{AttemptLog, CampaignStore, Clock, OperatorAlert, Transport};
use mailcast_core::types::{AttemptRecord, CampaignId, OwnerId};

use crate::advance::{AdvanceReport, StatusAdvancer};
use crate::engine::{CycleReport, DispatchEngine, DispatchSettings};
use crate::stats::{OwnerStats, StatisticsCache};

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub advance: AdvanceReport,
    pub dispatch: CycleReport,
}

pub struct Mailcast {
    store: Arc<dyn CampaignStore>,
    log: Arc<dyn AttemptLog>,
    clock: Arc<dyn Clock>,
    advancer: StatusAdvancer,
    engine: DispatchEngine,
    stats: StatisticsCache,
}

impl Mailcast {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        log: Arc<dyn AttemptLog>,
        transport: Arc<dyn Transport>,
        alert: Arc<dyn OperatorAlert>,
        clock: Arc<dyn Clock>,
        config: &MailcastConfig,
    ) -> Self {
        Self {
            advancer: StatusAdvancer::new(store.clone()),
            engine: DispatchEngine::new(
                store.clone(),
                log.clone(),
                transport,
                alert,
                clock.clone(),
                DispatchSettings::from_config(config),
            ),
            stats: StatisticsCache::new(store.clone(), &config.cache),
            store,
            log,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_statuses(&self, now: DateTime<Utc>) -> Result<AdvanceReport> {
        self.advancer.advance(now)
    }

    pub async fn run_dispatch_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.engine.run_cycle(now).await
    }

    /// Advance, then dispatch, at the same instant.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let advance = self.advance_statuses(now)?;
        let dispatch = self.run_dispatch_cycle(now).await?;
        Ok(TickReport {
            at: now,
            advance,
            dispatch,
        })
    }

    pub fn stats(&self, owner: OwnerId, now: DateTime<Utc>) -> Result<OwnerStats> {
        self.stats.get_stats(owner, now)
    }

    pub fn deactivate(&self, id: CampaignId) -> Result<bool> {
        let changed = self.advancer.deactivate(id)?;
        if changed {
            if let Some(owner) = self.store.get(id)?.and_then(|c| c.owner) {
                self.stats.invalidate(owner);
            }
        }
        Ok(changed)
    }

    /// Attempts of a campaign, newest first.
    pub fn history(&self, campaign: CampaignId) -> Result<Vec<AttemptRecord>> {
        self.log.history(campaign)
    }
}

/// Tick every `interval` until the task is dropped. A failed tick is logged
/// and the loop keeps going; ticks that fall behind are skipped, not queued.
pub async fn run_periodic(mailcast: Arc<Mailcast>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("⏰ Mailcast running every {}s", interval.as_secs());

    loop {
        ticker.tick().await;
        let now = mailcast.now();
        match mailcast.tick(now).await {
            Ok(report) => tracing::debug!(
                "Tick at {}: {} promoted, {} sent",
                report.at,
                report.advance.promoted.len(),
                report.dispatch.sent
            ),
            Err(e) => tracing::error!("Tick failed: {e}"),
        }
    }
}
