//! Domain model: campaigns, recipients, message bodies and attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MailcastError, Result};

pub type CampaignId = i64;
pub type RecipientId = i64;
pub type MessageId = i64;
pub type AttemptId = i64;
/// Account that owns campaigns and recipients.
pub type OwnerId = i64;

/// Subject used when a message is stored without one.
pub const DEFAULT_SUBJECT: &str = "No subject";

// ─── Frequency ──────────────────────────────────────────────

/// How often a recipient may be mailed by one campaign.
///
/// `Unknown` keeps whatever the store held so a bad row never fails a whole
/// listing; such campaigns have no cadence and are never dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Unknown(String),
}

impl Frequency {
    /// Minimum whole days between two sends to the same recipient.
    pub fn cadence_days(&self) -> Option<i64> {
        match self {
            Frequency::Daily => Some(1),
            Frequency::Weekly => Some(7),
            Frequency::Monthly => Some(30),
            Frequency::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Unknown(raw) => raw,
        }
    }
}

impl From<String> for Frequency {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            _ => Frequency::Unknown(raw),
        }
    }
}

impl From<&str> for Frequency {
    fn from(raw: &str) -> Self {
        Frequency::from(raw.to_string())
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.as_str().to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Campaign status ────────────────────────────────────────

/// Campaign lifecycle. Moves only forward: created → started → finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Created,
    Started,
    Finished,
}

impl CampaignStatus {
    /// Whether the time-driven state machine may move from `self` to `next`.
    /// Skips and backward moves are rejected; only `force_finish` bypasses this.
    pub fn can_advance_to(self, next: CampaignStatus) -> bool {
        matches!(
            (self, next),
            (CampaignStatus::Created, CampaignStatus::Started)
                | (CampaignStatus::Started, CampaignStatus::Finished)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == CampaignStatus::Finished
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Created => "created",
            CampaignStatus::Started => "started",
            CampaignStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = MailcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(CampaignStatus::Created),
            "started" => Ok(CampaignStatus::Started),
            "finished" => Ok(CampaignStatus::Finished),
            other => Err(MailcastError::Config(format!(
                "unknown campaign status '{other}'"
            ))),
        }
    }
}

// ─── Recipient & message ────────────────────────────────────

/// A mailing client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub email: String,
    pub name: String,
    pub comment: Option<String>,
    pub owner: Option<OwnerId>,
}

/// Body attached to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub id: MessageId,
    pub subject: String,
    pub body: Option<String>,
}

impl MessageContent {
    /// Build a message, falling back to [`DEFAULT_SUBJECT`] for blank subjects.
    pub fn new(id: MessageId, subject: &str, body: Option<String>) -> Self {
        let subject = if subject.trim().is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            subject.to_string()
        };
        Self { id, subject, body }
    }
}

// ─── Campaign ───────────────────────────────────────────────

/// A scheduled, recurring mailing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub start_time: DateTime<Utc>,
    /// `None` never closes the campaign, but also never opens its dispatch window.
    pub end_time: Option<DateTime<Utc>>,
    pub frequency: Frequency,
    pub status: CampaignStatus,
    pub owner: Option<OwnerId>,
    pub message: Option<MessageContent>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Move along the lifecycle, rejecting skips and backward moves.
    pub fn advance_to(&mut self, next: CampaignStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(MailcastError::InvalidTransition {
                campaign: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Manual deactivation: finished from any state. Returns false if it already was.
    pub fn force_finish(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = CampaignStatus::Finished;
        true
    }

    /// Strictly past the end time. A missing end time never expires.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| end < now)
    }

    /// `start < now < end`, strict on both bounds. A missing end time is
    /// treated as already passed here, so such a campaign never dispatches.
    pub fn in_dispatch_window(&self, now: DateTime<Utc>) -> bool {
        self.start_time < now && self.end_time.is_some_and(|end| now < end)
    }

    pub fn cadence_days(&self) -> Option<i64> {
        self.frequency.cadence_days()
    }
}

// ─── Attempt log ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Successful,
    Error,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Successful => "successful",
            AttemptOutcome::Error => "error",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = MailcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "successful" => Ok(AttemptOutcome::Successful),
            "error" => Ok(AttemptOutcome::Error),
            other => Err(MailcastError::Config(format!(
                "unknown attempt outcome '{other}'"
            ))),
        }
    }
}

/// One delivery attempt, written once and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: AttemptId,
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub response_code: Option<String>,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
}

/// An attempt before the log assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttempt {
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub response_code: Option<String>,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
}

impl NewAttempt {
    pub fn into_record(self, id: AttemptId) -> AttemptRecord {
        AttemptRecord {
            id,
            attempted_at: self.attempted_at,
            outcome: self.outcome,
            response_code: self.response_code,
            campaign_id: self.campaign_id,
            recipient_id: self.recipient_id,
        }
    }
}
