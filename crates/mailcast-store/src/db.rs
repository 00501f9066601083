//! SQLite-backed persistence for campaigns, recipients, messages and the attempt log.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::{AttemptLog, CampaignStore};
use mailcast_core::types::{
    AttemptId, AttemptRecord, Campaign, CampaignId, CampaignStatus, DEFAULT_SUBJECT, Frequency,
    MessageContent, MessageId, NewAttempt, OwnerId, Recipient, RecipientId,
};

/// Mailing database: campaign store and attempt log in one SQLite file.
pub struct MailingDb {
    conn: Mutex<Connection>,
}

/// A recipient before it has an id.
#[derive(Debug, Clone)]
pub struct NewRecipient {
    pub email: String,
    pub name: String,
    pub comment: Option<String>,
    pub owner: Option<OwnerId>,
}

/// A campaign before it has an id. Always starts in `created`.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub frequency: Frequency,
    pub owner: Option<OwnerId>,
    pub message_id: Option<MessageId>,
    pub recipient_ids: Vec<RecipientId>,
}

/// Shared SELECT for campaigns, joined with their message.
const CAMPAIGN_SELECT: &str = "SELECT c.id, c.start_time, c.end_time, c.frequency, c.status, c.owner_id, c.updated_at, m.id, m.subject, m.body FROM campaigns c LEFT JOIN messages m ON m.id = c.message_id";

const RECIPIENT_COLUMNS: &str = "r.id, r.email, r.name, r.comment, r.owner_id";

const ATTEMPT_SELECT: &str = "SELECT id, attempted_at, outcome, response_code, campaign_id, recipient_id FROM attempt_log";

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_campaign(row: &Row) -> rusqlite::Result<Campaign> {
    let start_raw: String = row.get(1)?;
    let end_raw: Option<String> = row.get(2)?;
    let frequency: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let updated_raw: String = row.get(6)?;
    let message_id: Option<MessageId> = row.get(7)?;

    let message = match message_id {
        Some(id) => {
            let subject: Option<String> = row.get(8)?;
            Some(MessageContent::new(
                id,
                subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
                row.get(9)?,
            ))
        }
        None => None,
    };

    Ok(Campaign {
        id: row.get(0)?,
        start_time: parse_ts(&start_raw, 1)?,
        end_time: end_raw.map(|raw| parse_ts(&raw, 2)).transpose()?,
        frequency: Frequency::from(frequency),
        status: status_raw
            .parse::<CampaignStatus>()
            .map_err(|e| conversion_error(4, e))?,
        owner: row.get(5)?,
        message,
        updated_at: parse_ts(&updated_raw, 6)?,
    })
}

fn row_to_recipient(row: &Row) -> rusqlite::Result<Recipient> {
    Ok(Recipient {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        comment: row.get(3)?,
        owner: row.get(4)?,
    })
}

fn row_to_attempt(row: &Row) -> rusqlite::Result<AttemptRecord> {
    let at_raw: String = row.get(1)?;
    let outcome_raw: String = row.get(2)?;
    Ok(AttemptRecord {
        id: row.get(0)?,
        attempted_at: parse_ts(&at_raw, 1)?,
        outcome: outcome_raw.parse().map_err(|e| conversion_error(2, e))?,
        response_code: row.get(3)?,
        campaign_id: row.get(4)?,
        recipient_id: row.get(5)?,
    })
}

impl MailingDb {
    /// Open or create the mailing database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| MailcastError::persistence("DB open", e))?;

        // WAL lets the dispatch workers read while an append is in progress
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| MailcastError::persistence("DB pragma", e))?;

        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| MailcastError::persistence("DB open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| MailcastError::persistence("DB pragma", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MailcastError::Persistence("connection lock poisoned".into()))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL CHECK (length(email) > 0),
                name TEXT NOT NULL,
                comment TEXT,
                owner_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL DEFAULT 'No subject',
                body TEXT
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                frequency TEXT NOT NULL,          -- 'daily', 'weekly', 'monthly'
                status TEXT NOT NULL DEFAULT 'created',
                updated_at TEXT NOT NULL,
                message_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
                owner_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS campaign_recipients (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                recipient_id INTEGER NOT NULL REFERENCES recipients(id) ON DELETE CASCADE,
                PRIMARY KEY (campaign_id, recipient_id)
            );

            -- Append-only: rows are never updated by the engine
            CREATE TABLE IF NOT EXISTS attempt_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attempted_at TEXT NOT NULL,
                outcome TEXT NOT NULL,            -- 'successful', 'error'
                response_code TEXT,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                recipient_id INTEGER NOT NULL REFERENCES recipients(id) ON DELETE CASCADE
            );

            -- One row per pair while some dispatcher is sending to it
            CREATE TABLE IF NOT EXISTS dispatch_claims (
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                recipient_id INTEGER NOT NULL REFERENCES recipients(id) ON DELETE CASCADE,
                holder TEXT NOT NULL,
                claimed_at TEXT NOT NULL,
                PRIMARY KEY (campaign_id, recipient_id)
            );

            CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status);
            CREATE INDEX IF NOT EXISTS idx_attempt_pair
                ON attempt_log(campaign_id, recipient_id, attempted_at);
         ",
            )
            .map_err(|e| MailcastError::persistence("Migration", e))?;
        Ok(())
    }

    // ─── Administrative writes ──────────────────────────────

    pub fn create_recipient(&self, new: &NewRecipient) -> Result<Recipient> {
        if new.email.trim().is_empty() {
            return Err(MailcastError::Config("recipient email is empty".into()));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO recipients (email, name, comment, owner_id) VALUES (?1, ?2, ?3, ?4)",
            params![new.email.trim(), new.name, new.comment, new.owner],
        )
        .map_err(|e| MailcastError::persistence("Create recipient", e))?;
        Ok(Recipient {
            id: conn.last_insert_rowid(),
            email: new.email.trim().to_string(),
            name: new.name.clone(),
            comment: new.comment.clone(),
            owner: new.owner,
        })
    }

    pub fn create_message(&self, subject: &str, body: Option<&str>) -> Result<MessageContent> {
        let conn = self.conn()?;
        let message = MessageContent::new(0, subject, body.map(str::to_string));
        conn.execute(
            "INSERT INTO messages (subject, body) VALUES (?1, ?2)",
            params![message.subject, message.body],
        )
        .map_err(|e| MailcastError::persistence("Create message", e))?;
        Ok(MessageContent {
            id: conn.last_insert_rowid(),
            ..message
        })
    }

    pub fn create_campaign(&self, new: &NewCampaign) -> Result<Campaign> {
        let id = {
            let mut conn = self.conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| MailcastError::persistence("Create campaign", e))?;
            tx.execute(
                "INSERT INTO campaigns (start_time, end_time, frequency, status, updated_at, message_id, owner_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    fmt_ts(new.start_time),
                    new.end_time.map(fmt_ts),
                    new.frequency.as_str(),
                    CampaignStatus::Created.as_str(),
                    fmt_ts(Utc::now()),
                    new.message_id,
                    new.owner,
                ],
            )
            .map_err(|e| MailcastError::persistence("Create campaign", e))?;
            let id = tx.last_insert_rowid();
            for recipient in &new.recipient_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO campaign_recipients (campaign_id, recipient_id) VALUES (?1, ?2)",
                    params![id, recipient],
                )
                .map_err(|e| MailcastError::persistence("Attach recipient", e))?;
            }
            tx.commit()
                .map_err(|e| MailcastError::persistence("Create campaign", e))?;
            id
        };
        tracing::info!("📅 Campaign created: {id} ({})", new.frequency);
        self.get(id)?
            .ok_or_else(|| MailcastError::NotFound(format!("campaign {id}")))
    }

    /// Add recipients to an existing campaign. Already-attached ones are ignored.
    pub fn add_recipients(&self, campaign: CampaignId, recipients: &[RecipientId]) -> Result<()> {
        let conn = self.conn()?;
        for recipient in recipients {
            conn.execute(
                "INSERT OR IGNORE INTO campaign_recipients (campaign_id, recipient_id) VALUES (?1, ?2)",
                params![campaign, recipient],
            )
            .map_err(|e| MailcastError::persistence("Attach recipient", e))?;
        }
        Ok(())
    }
}

impl CampaignStore for MailingDb {
    fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{CAMPAIGN_SELECT} WHERE c.status = ?1 ORDER BY c.id"))
            .map_err(|e| MailcastError::persistence("List campaigns", e))?;
        let rows = stmt
            .query_map([status.as_str()], row_to_campaign)
            .map_err(|e| MailcastError::persistence("List campaigns", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MailcastError::persistence("List campaigns", e))
    }

    fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{CAMPAIGN_SELECT} WHERE c.id = ?1"),
            [id],
            row_to_campaign,
        )
        .optional()
        .map_err(|e| MailcastError::persistence("Get campaign", e))
    }

    fn save(&self, campaign: &Campaign) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE campaigns SET start_time = ?1, end_time = ?2, frequency = ?3,
                        status = CASE status WHEN 'finished' THEN status ELSE ?4 END,
                        message_id = ?5, owner_id = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    fmt_ts(campaign.start_time),
                    campaign.end_time.map(fmt_ts),
                    campaign.frequency.as_str(),
                    campaign.status.as_str(),
                    campaign.message.as_ref().map(|m| m.id),
                    campaign.owner,
                    fmt_ts(Utc::now()),
                    campaign.id,
                ],
            )
            .map_err(|e| MailcastError::persistence("Save campaign", e))?;
        if changed == 0 {
            return Err(MailcastError::NotFound(format!("campaign {}", campaign.id)));
        }
        Ok(())
    }

    fn transition(&self, id: CampaignId, from: CampaignStatus, to: CampaignStatus) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), fmt_ts(Utc::now()), id, from.as_str()],
            )
            .map_err(|e| MailcastError::persistence("Campaign transition", e))?;
        if changed == 0 {
            tracing::debug!("Campaign {id} no longer {from}, {to} transition skipped");
        }
        Ok(changed == 1)
    }

    fn recipients(&self, campaign: &Campaign) -> Result<Vec<Recipient>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECIPIENT_COLUMNS} FROM recipients r
                 JOIN campaign_recipients cr ON cr.recipient_id = r.id
                 WHERE cr.campaign_id = ?1 ORDER BY r.name, r.id"
            ))
            .map_err(|e| MailcastError::persistence("List recipients", e))?;
        let rows = stmt
            .query_map([campaign.id], row_to_recipient)
            .map_err(|e| MailcastError::persistence("List recipients", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MailcastError::persistence("List recipients", e))
    }

    fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Campaign>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{CAMPAIGN_SELECT} WHERE c.owner_id = ?1 ORDER BY c.id"))
            .map_err(|e| MailcastError::persistence("List owner campaigns", e))?;
        let rows = stmt
            .query_map([owner], row_to_campaign)
            .map_err(|e| MailcastError::persistence("List owner campaigns", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MailcastError::persistence("List owner campaigns", e))
    }

    fn recipients_by_owner(&self, owner: OwnerId) -> Result<Vec<Recipient>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECIPIENT_COLUMNS} FROM recipients r WHERE r.owner_id = ?1 ORDER BY r.name, r.id"
            ))
            .map_err(|e| MailcastError::persistence("List owner recipients", e))?;
        let rows = stmt
            .query_map([owner], row_to_recipient)
            .map_err(|e| MailcastError::persistence("List owner recipients", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MailcastError::persistence("List owner recipients", e))
    }
}

impl AttemptLog for MailingDb {
    fn latest_attempt(
        &self,
        campaign: CampaignId,
        recipient: RecipientId,
    ) -> Result<Option<AttemptRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "{ATTEMPT_SELECT} WHERE campaign_id = ?1 AND recipient_id = ?2
                 ORDER BY attempted_at DESC, id DESC LIMIT 1"
            ),
            params![campaign, recipient],
            row_to_attempt,
        )
        .optional()
        .map_err(|e| MailcastError::persistence("Latest attempt", e))
    }

    fn append(&self, attempt: NewAttempt) -> Result<AttemptRecord> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| MailcastError::persistence("Append attempt", e))?;
        tx.execute(
            "INSERT INTO attempt_log (attempted_at, outcome, response_code, campaign_id, recipient_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                fmt_ts(attempt.attempted_at),
                attempt.outcome.as_str(),
                attempt.response_code,
                attempt.campaign_id,
                attempt.recipient_id,
            ],
        )
        .map_err(|e| MailcastError::persistence("Append attempt", e))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM dispatch_claims WHERE campaign_id = ?1 AND recipient_id = ?2",
            params![attempt.campaign_id, attempt.recipient_id],
        )
        .map_err(|e| MailcastError::persistence("Append attempt", e))?;
        tx.commit()
            .map_err(|e| MailcastError::persistence("Append attempt", e))?;
        Ok(attempt.into_record(id))
    }

    fn try_claim(
        &self,
        campaign: CampaignId,
        recipient: RecipientId,
        holder: &str,
        seen: Option<AttemptId>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so the re-check and the
        // claim see the same snapshot across processes
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| MailcastError::persistence("Claim pair", e))?;

        let appended_since: bool = tx
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM attempt_log
                 WHERE campaign_id = ?1 AND recipient_id = ?2 AND id > ?3)",
                params![campaign, recipient, seen.unwrap_or(0)],
                |row| row.get(0),
            )
            .map_err(|e| MailcastError::persistence("Claim pair", e))?;
        if appended_since {
            return Ok(false);
        }

        let now = Utc::now();
        let stale_before = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let taken = tx
            .execute(
                "INSERT INTO dispatch_claims (campaign_id, recipient_id, holder, claimed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (campaign_id, recipient_id) DO UPDATE
                    SET holder = excluded.holder, claimed_at = excluded.claimed_at
                    WHERE dispatch_claims.holder = excluded.holder
                       OR dispatch_claims.claimed_at <= ?5",
                params![campaign, recipient, holder, fmt_ts(now), fmt_ts(stale_before)],
            )
            .map_err(|e| MailcastError::persistence("Claim pair", e))?;
        tx.commit()
            .map_err(|e| MailcastError::persistence("Claim pair", e))?;
        Ok(taken == 1)
    }

    fn history(&self, campaign: CampaignId) -> Result<Vec<AttemptRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{ATTEMPT_SELECT} WHERE campaign_id = ?1 ORDER BY attempted_at DESC, id DESC"
            ))
            .map_err(|e| MailcastError::persistence("Attempt history", e))?;
        let rows = stmt
            .query_map([campaign], row_to_attempt)
            .map_err(|e| MailcastError::persistence("Attempt history", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MailcastError::persistence("Attempt history", e))
    }
}
