//! Persistence seams: the campaign store and the append-only attempt log.
//!
//! Both are synchronous; implementations are expected to be cheap local
//! stores (SQLite) and to support concurrent readers with append-only writers.
//! Callers on an async runtime run them on the blocking pool.

use chrono::Duration;

use crate::error::Result;
use crate::types::{
    AttemptId, AttemptRecord, Campaign, CampaignId, CampaignStatus, NewAttempt, OwnerId, Recipient,
    RecipientId,
};

pub trait CampaignStore: Send + Sync {
    /// All campaigns currently in `status`.
    fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;

    fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Persist the campaign's mutable fields (status, schedule, message, owner).
    /// A stored `finished` status is never overwritten.
    fn save(&self, campaign: &Campaign) -> Result<()>;

    /// Move `id` from `from` to `to` only if it is still in `from`.
    /// Returns `false` when the campaign changed (or vanished) in between.
    fn transition(&self, id: CampaignId, from: CampaignStatus, to: CampaignStatus) -> Result<bool>;

    fn recipients(&self, campaign: &Campaign) -> Result<Vec<Recipient>>;

    fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Campaign>>;

    fn recipients_by_owner(&self, owner: OwnerId) -> Result<Vec<Recipient>>;
}

pub trait AttemptLog: Send + Sync {
    /// Most recent attempt for the pair, regardless of outcome.
    fn latest_attempt(
        &self,
        campaign: CampaignId,
        recipient: RecipientId,
    ) -> Result<Option<AttemptRecord>>;

    /// Record an attempt and drop any dispatch claim on its pair, atomically.
    fn append(&self, attempt: NewAttempt) -> Result<AttemptRecord>;

    /// Take the dispatch claim on a pair. Returns `false` while another
    /// holder's claim is younger than `ttl`, or when the pair's latest attempt
    /// is no longer `seen` (someone appended since the due check).
    /// The claim lasts until `append` for the pair, or until it goes stale.
    fn try_claim(
        &self,
        campaign: CampaignId,
        recipient: RecipientId,
        holder: &str,
        seen: Option<AttemptId>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Every attempt of a campaign, newest first.
    fn history(&self, campaign: CampaignId) -> Result<Vec<AttemptRecord>>;
}
