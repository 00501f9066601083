//! Dispatch engine: one finite pass over every started campaign.
//!
//! Expired campaigns are finished. For the rest, every (campaign, recipient)
//! pair becomes a job; jobs run on a bounded window of tokio tasks, each send
//! under its own deadline. A job holds its pair lock from the due check until
//! the attempt record is appended, so overlapping cycles in one process cannot
//! double-send. Across processes sharing the database, the job also takes a
//! store-level claim on the pair before sending; the append releases it.
//!
//! Store calls are synchronous and run on tokio's blocking pool.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;

use mailcast_core::config::MailcastConfig;
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::{AttemptLog, CampaignStore, Clock, OperatorAlert, Transport};
use mailcast_core::types::{
    AttemptOutcome, Campaign, CampaignId, CampaignStatus, MessageContent, NewAttempt, Recipient,
    RecipientId,
};

use crate::due;
use crate::locks::PairLocks;

/// Longest response code kept on an attempt record.
const RESPONSE_CODE_LEN: usize = 3;

/// Slack on top of send + alert before a pair claim counts as abandoned.
const CLAIM_MARGIN: Duration = Duration::from_secs(30);

static ENGINE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub from_address: String,
    pub max_concurrent_sends: usize,
    pub send_timeout: Duration,
    /// Age after which another dispatcher may take over a pair claim.
    pub claim_ttl: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &MailcastConfig) -> Self {
        let send_timeout = config.dispatch.send_timeout();
        Self {
            from_address: config.smtp.from_address.clone(),
            max_concurrent_sends: config.dispatch.max_concurrent_sends,
            send_timeout,
            claim_ttl: send_timeout.saturating_mul(2).saturating_add(CLAIM_MARGIN),
        }
    }
}

/// A failure that aborted one item (a campaign or a single recipient).
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub campaign_id: Option<CampaignId>,
    pub recipient_id: Option<RecipientId>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub campaigns_scanned: usize,
    pub campaigns_finished: Vec<CampaignId>,
    /// Attempts recorded as successful.
    pub sent: usize,
    /// Attempts recorded as error.
    pub failed: usize,
    /// Recipients that were not due, or whose campaign cannot dispatch.
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

impl CycleReport {
    pub fn attempts(&self) -> usize {
        self.sent + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Sent,
    Failed,
    Skipped,
}

struct Job {
    campaign: Arc<Campaign>,
    recipient: Recipient,
}

struct Shared {
    store: Arc<dyn CampaignStore>,
    log: Arc<dyn AttemptLog>,
    transport: Arc<dyn Transport>,
    alert: Arc<dyn OperatorAlert>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    locks: PairLocks,
    /// Identifies this engine's claims in the shared store.
    holder: String,
}

#[derive(Clone)]
pub struct DispatchEngine {
    shared: Arc<Shared>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        log: Arc<dyn AttemptLog>,
        transport: Arc<dyn Transport>,
        alert: Arc<dyn OperatorAlert>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                log,
                transport,
                alert,
                clock,
                settings,
                locks: PairLocks::default(),
                holder: format!(
                    "{}-{}-{}",
                    std::process::id(),
                    Utc::now().timestamp_micros(),
                    ENGINE_SEQ.fetch_add(1, Ordering::Relaxed)
                ),
            }),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.shared.settings
    }

    /// Run one dispatch cycle at `now`.
    ///
    /// Only a failure to list started campaigns fails the whole cycle. Every
    /// other failure is recorded in the report and the cycle moves on.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let shared = &self.shared;
        let started = blocking(&shared.store, |store| {
            store.list_by_status(CampaignStatus::Started)
        })
        .await?;
        let mut report = CycleReport {
            campaigns_scanned: started.len(),
            ..Default::default()
        };

        let mut jobs = Vec::new();
        for campaign in started {
            if campaign.has_ended(now) {
                let id = campaign.id;
                match blocking(&shared.store, move |store| finish(store, campaign)).await {
                    Ok(true) => {
                        tracing::info!("🏁 Campaign {id} finished");
                        report.campaigns_finished.push(id);
                    }
                    Ok(false) => {
                        tracing::debug!("Campaign {id} changed since listing, not finished");
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ Failed to finish campaign {id}: {e}");
                        report.errors.push(ItemError {
                            campaign_id: Some(id),
                            recipient_id: None,
                            message: e.to_string(),
                        });
                    }
                }
                continue;
            }
            if !campaign.in_dispatch_window(now) {
                tracing::debug!("Campaign {} outside its dispatch window", campaign.id);
                continue;
            }
            let campaign = Arc::new(campaign);
            let listed = Arc::clone(&campaign);
            let recipients = match blocking(&shared.store, move |store| store.recipients(&listed))
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("⚠️ Recipients of campaign {} unavailable: {e}", campaign.id);
                    report.errors.push(ItemError {
                        campaign_id: Some(campaign.id),
                        recipient_id: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            jobs.extend(recipients.into_iter().map(|recipient| Job {
                campaign: Arc::clone(&campaign),
                recipient,
            }));
        }

        if !jobs.is_empty() {
            tracing::info!(
                jobs = jobs.len(),
                max_concurrent = shared.settings.max_concurrent_sends,
                "Dispatching"
            );
        }

        let mut join_set = JoinSet::new();
        let mut pending = jobs.into_iter();
        let width = shared.settings.max_concurrent_sends.max(1);
        for job in pending.by_ref().take(width) {
            join_set.spawn(run_job(Arc::clone(shared), job, now));
        }
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, _, Ok(JobOutcome::Sent))) => report.sent += 1,
                Ok((_, _, Ok(JobOutcome::Failed))) => report.failed += 1,
                Ok((_, _, Ok(JobOutcome::Skipped))) => report.skipped += 1,
                Ok((campaign_id, recipient_id, Err(e))) => {
                    tracing::warn!("⚠️ Campaign {campaign_id} recipient {recipient_id}: {e}");
                    report.errors.push(ItemError {
                        campaign_id: Some(campaign_id),
                        recipient_id: Some(recipient_id),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!("Dispatch task aborted: {e}");
                    report.errors.push(ItemError {
                        campaign_id: None,
                        recipient_id: None,
                        message: e.to_string(),
                    });
                }
            }
            if let Some(job) = pending.next() {
                join_set.spawn(run_job(Arc::clone(shared), job, now));
            }
        }

        shared.locks.prune();
        tracing::info!(
            "📬 Cycle done: {} sent, {} failed, {} skipped, {} finished, {} errors",
            report.sent,
            report.failed,
            report.skipped,
            report.campaigns_finished.len(),
            report.errors.len()
        );
        Ok(report)
    }
}

/// `false` when the stored campaign is no longer `started`.
fn finish(store: &dyn CampaignStore, mut campaign: Campaign) -> Result<bool> {
    let from = campaign.status;
    campaign.advance_to(CampaignStatus::Finished)?;
    store.transition(campaign.id, from, campaign.status)
}

/// Run a synchronous store call on the blocking pool.
async fn blocking<S, T, F>(target: &Arc<S>, call: F) -> Result<T>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
{
    let target = Arc::clone(target);
    tokio::task::spawn_blocking(move || call(target.as_ref()))
        .await
        .map_err(|e| MailcastError::Other(format!("store task failed: {e}")))?
}

async fn run_job(
    shared: Arc<Shared>,
    job: Job,
    now: DateTime<Utc>,
) -> (CampaignId, RecipientId, Result<JobOutcome>) {
    let ids = (job.campaign.id, job.recipient.id);
    let result = process(&shared, &job, now).await;
    (ids.0, ids.1, result)
}

async fn process(shared: &Shared, job: &Job, now: DateTime<Utc>) -> Result<JobOutcome> {
    let Job {
        campaign,
        recipient,
    } = job;
    let (campaign_id, recipient_id) = (campaign.id, recipient.id);
    let _guard = shared.locks.acquire(campaign_id, recipient_id).await;

    let latest = blocking(&shared.log, move |log| {
        log.latest_attempt(campaign_id, recipient_id)
    })
    .await?;
    let decision = due::decide(campaign, latest.as_ref(), now);
    if !decision.is_due() {
        tracing::debug!(
            "Skipping {} for campaign {}: {decision:?}",
            recipient.email,
            campaign.id
        );
        return Ok(JobOutcome::Skipped);
    }
    let Some(message) = campaign.message.as_ref() else {
        return Ok(JobOutcome::Skipped);
    };

    // Another process may be sending to the same pair right now
    let holder = shared.holder.clone();
    let seen = latest.as_ref().map(|a| a.id);
    let ttl = chrono::Duration::from_std(shared.settings.claim_ttl)
        .unwrap_or(chrono::Duration::MAX);
    let claimed = blocking(&shared.log, move |log| {
        log.try_claim(campaign_id, recipient_id, &holder, seen, ttl)
    })
    .await?;
    if !claimed {
        tracing::debug!(
            "Skipping {} for campaign {}: taken by another dispatcher",
            recipient.email,
            campaign.id
        );
        return Ok(JobOutcome::Skipped);
    }

    let (outcome, response_code) = deliver(shared, campaign, message, recipient).await;
    let attempt = NewAttempt {
        attempted_at: shared.clock.now(),
        outcome,
        response_code,
        campaign_id,
        recipient_id,
    };
    // On failure the claim stays until it goes stale, holding off a resend
    blocking(&shared.log, move |log| log.append(attempt)).await?;

    Ok(match outcome {
        AttemptOutcome::Successful => JobOutcome::Sent,
        AttemptOutcome::Error => JobOutcome::Failed,
    })
}

/// Hand one message to the relay. Never fails: every result maps to an outcome.
async fn deliver(
    shared: &Shared,
    campaign: &Campaign,
    message: &MessageContent,
    recipient: &Recipient,
) -> (AttemptOutcome, Option<String>) {
    let to = [recipient.email.clone()];
    let body = message.body.as_deref().unwrap_or_default();
    let send = shared.transport.send(
        &message.subject,
        body,
        &shared.settings.from_address,
        &to,
    );

    match tokio::time::timeout(shared.settings.send_timeout, send).await {
        Ok(Ok(report)) if report.accepted > 0 => {
            tracing::info!("📧 Campaign {} → {}", campaign.id, recipient.email);
            (AttemptOutcome::Successful, short_code(report.response_code))
        }
        Ok(Ok(report)) => {
            tracing::warn!(
                "Relay accepted no recipients for {} (campaign {})",
                recipient.email,
                campaign.id
            );
            (AttemptOutcome::Error, short_code(report.response_code))
        }
        Ok(Err(e)) => {
            tracing::warn!(
                "❌ Send to {} failed (campaign {}): {e}",
                recipient.email,
                campaign.id
            );
            alert(shared, campaign, recipient, &e.to_string()).await;
            (AttemptOutcome::Error, short_code(e.code))
        }
        Err(_) => {
            let detail = format!("send timed out after {:?}", shared.settings.send_timeout);
            tracing::warn!(
                "⏱️ Send to {} timed out (campaign {})",
                recipient.email,
                campaign.id
            );
            alert(shared, campaign, recipient, &detail).await;
            (AttemptOutcome::Error, None)
        }
    }
}

/// Best effort. Bounded by the send timeout and never propagated.
async fn alert(shared: &Shared, campaign: &Campaign, recipient: &Recipient, error: &str) {
    let subject = format!("Delivery failed for campaign {}", campaign.id);
    let detail = format!(
        "Campaign {} could not deliver to {} <{}>: {error}",
        campaign.id, recipient.name, recipient.email
    );
    let notify = shared.alert.notify(&subject, &detail);
    match tokio::time::timeout(shared.settings.send_timeout, notify).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Operator alert via {} failed: {e}", shared.alert.name()),
        Err(_) => tracing::warn!("Operator alert via {} timed out", shared.alert.name()),
    }
}

fn short_code(code: Option<String>) -> Option<String> {
    code.map(|c| c.trim().chars().take(RESPONSE_CODE_LEN).collect::<String>())
        .filter(|c| !c.is_empty())
}
