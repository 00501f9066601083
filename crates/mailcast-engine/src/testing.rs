//! In-crate test doubles: scripted relay, recording alert, a store that fails on demand.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use mailcast_core::error::{MailcastError, Result, TransportError};
use mailcast_core::traits::{CampaignStore, OperatorAlert, SendReport, Transport};
use mailcast_core::types::{Campaign, CampaignId, CampaignStatus, Frequency, OwnerId, Recipient};
use mailcast_store::{MailingDb, NewCampaign, NewRecipient};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

/// How the relay answers for one address.
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    /// Relay answers but accepts nobody.
    AcceptNone,
    Fail(&'static str, &'static str),
    /// Accepts after the given number of milliseconds.
    Delay(u64),
    /// Never completes.
    Hang,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    sent: Mutex<Vec<SentMail>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, email: &str, script: Script) -> Self {
        self.scripts.insert(email.to_string(), script);
        self
    }

    /// Every send call, including failed and hung ones.
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, email: &str) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.to.iter().any(|t| t == email))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        to: &[String],
    ) -> std::result::Result<SendReport, TransportError> {
        self.sent.lock().unwrap().push(SentMail {
            subject: subject.to_string(),
            body: body.to_string(),
            from: from.to_string(),
            to: to.to_vec(),
        });
        let script = to
            .first()
            .and_then(|addr| self.scripts.get(addr))
            .cloned()
            .unwrap_or(Script::Accept);
        match script {
            Script::Accept => Ok(SendReport {
                accepted: to.len(),
                response_code: Some("250".into()),
            }),
            Script::AcceptNone => Ok(SendReport::accepted(0)),
            Script::Fail(code, message) => Err(TransportError::with_code(code, message)),
            Script::Delay(ms) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                Ok(SendReport {
                    accepted: to.len(),
                    response_code: Some("250".into()),
                })
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingAlert {
    fail: bool,
    notes: Mutex<Vec<(String, String)>>,
}

impl RecordingAlert {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the call, then reports failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorAlert for RecordingAlert {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, subject: &str, detail: &str) -> Result<()> {
        self.notes
            .lock()
            .unwrap()
            .push((subject.to_string(), detail.to_string()));
        if self.fail {
            return Err(MailcastError::Alert("alert channel down".into()));
        }
        Ok(())
    }
}

/// Delegates to a [`MailingDb`] but refuses writes to selected campaigns.
/// Can also finish every campaign it lists, as a concurrent deactivation would.
pub struct FlakyStore {
    inner: Arc<MailingDb>,
    failing_writes: HashSet<CampaignId>,
    finish_after_listing: bool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MailingDb>) -> Self {
        Self {
            inner,
            failing_writes: HashSet::new(),
            finish_after_listing: false,
        }
    }

    pub fn fail_writes(mut self, id: CampaignId) -> Self {
        self.failing_writes.insert(id);
        self
    }

    /// Listed campaigns are finished behind the caller's back.
    pub fn finish_after_listing(mut self) -> Self {
        self.finish_after_listing = true;
        self
    }

    fn check_write(&self, id: CampaignId) -> Result<()> {
        if self.failing_writes.contains(&id) {
            return Err(MailcastError::Persistence("disk I/O error".into()));
        }
        Ok(())
    }
}

impl CampaignStore for FlakyStore {
    fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let listed = self.inner.list_by_status(status)?;
        if self.finish_after_listing {
            for campaign in &listed {
                self.inner
                    .transition(campaign.id, campaign.status, CampaignStatus::Finished)?;
            }
        }
        Ok(listed)
    }

    fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.inner.get(id)
    }

    fn save(&self, campaign: &Campaign) -> Result<()> {
        self.check_write(campaign.id)?;
        self.inner.save(campaign)
    }

    fn transition(&self, id: CampaignId, from: CampaignStatus, to: CampaignStatus) -> Result<bool> {
        self.check_write(id)?;
        self.inner.transition(id, from, to)
    }

    fn recipients(&self, campaign: &Campaign) -> Result<Vec<Recipient>> {
        self.inner.recipients(campaign)
    }

    fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Campaign>> {
        self.inner.list_by_owner(owner)
    }

    fn recipients_by_owner(&self, owner: OwnerId) -> Result<Vec<Recipient>> {
        self.inner.recipients_by_owner(owner)
    }
}

/// Campaign fixture. `start`/`end` are offsets from `t0()`.
pub struct Seed<'a> {
    pub start: Duration,
    pub end: Option<Duration>,
    pub frequency: &'a str,
    pub emails: &'a [&'a str],
    pub with_message: bool,
    pub status: CampaignStatus,
    pub owner: OwnerId,
}

impl Default for Seed<'_> {
    fn default() -> Self {
        Self {
            start: -Duration::hours(2),
            end: Some(Duration::hours(2)),
            frequency: "daily",
            emails: &["ana@example.com"],
            with_message: true,
            status: CampaignStatus::Started,
            owner: 1,
        }
    }
}

impl Seed<'_> {
    pub fn insert(&self, db: &MailingDb) -> (Campaign, Vec<Recipient>) {
        let recipients: Vec<Recipient> = self
            .emails
            .iter()
            .enumerate()
            .map(|(i, email)| {
                db.create_recipient(&NewRecipient {
                    email: email.to_string(),
                    name: format!("r{i:02}"),
                    comment: None,
                    owner: Some(self.owner),
                })
                .unwrap()
            })
            .collect();
        let message_id = self
            .with_message
            .then(|| db.create_message("Weekly digest", Some("Hello!")).unwrap().id);
        let mut campaign = db
            .create_campaign(&NewCampaign {
                start_time: t0() + self.start,
                end_time: self.end.map(|e| t0() + e),
                frequency: Frequency::from(self.frequency),
                owner: Some(self.owner),
                message_id,
                recipient_ids: recipients.iter().map(|r| r.id).collect(),
            })
            .unwrap();
        if campaign.status != self.status {
            campaign.status = self.status;
            db.save(&campaign).unwrap();
        }
        (campaign, recipients)
    }
}
