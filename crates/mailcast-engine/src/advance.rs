//! Lifecycle advancer: promotes `created` campaigns whose start time has come,
//! and applies manual deactivation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::CampaignStore;
use mailcast_core::types::{Campaign, CampaignId, CampaignStatus};

/// Outcome of one advance pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdvanceReport {
    pub scanned: usize,
    pub promoted: Vec<CampaignId>,
    /// Campaigns whose transition could not be persisted; retried next pass.
    pub failures: Vec<(CampaignId, String)>,
}

const MAX_DEACTIVATE_RACES: usize = 3;

pub struct StatusAdvancer {
    store: Arc<dyn CampaignStore>,
}

impl StatusAdvancer {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// Move every `created` campaign with `start_time <= now` to `started`.
    ///
    /// Fails only if the listing itself fails. A campaign whose write fails is
    /// reported and the scan continues with the next one. A campaign that was
    /// changed elsewhere after listing (e.g. deactivated) is left alone.
    pub fn advance(&self, now: DateTime<Utc>) -> Result<AdvanceReport> {
        let created = self.store.list_by_status(CampaignStatus::Created)?;
        let mut report = AdvanceReport {
            scanned: created.len(),
            ..Default::default()
        };

        for mut campaign in created {
            if campaign.start_time > now {
                continue;
            }
            match self.promote(&mut campaign) {
                Ok(true) => {
                    tracing::info!("▶️ Campaign {} started", campaign.id);
                    report.promoted.push(campaign.id);
                }
                Ok(false) => {
                    tracing::debug!("Campaign {} changed since listing, not promoted", campaign.id);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to start campaign {}: {e}", campaign.id);
                    report.failures.push((campaign.id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// `false` when the stored campaign is no longer in the listed status.
    fn promote(&self, campaign: &mut Campaign) -> Result<bool> {
        let from = campaign.status;
        campaign.advance_to(CampaignStatus::Started)?;
        self.store.transition(campaign.id, from, campaign.status)
    }

    /// Force a campaign to `finished` from any state.
    /// Returns `false` when it was already finished.
    pub fn deactivate(&self, id: CampaignId) -> Result<bool> {
        // Statuses only move forward, so a lost race can repeat at most twice
        for _ in 0..MAX_DEACTIVATE_RACES {
            let mut campaign = self
                .store
                .get(id)?
                .ok_or_else(|| MailcastError::NotFound(format!("campaign {id}")))?;
            let from = campaign.status;
            if !campaign.force_finish() {
                return Ok(false);
            }
            if self.store.transition(id, from, campaign.status)? {
                tracing::info!("⏹️ Campaign {id} deactivated");
                return Ok(true);
            }
        }
        Err(MailcastError::Persistence(format!(
            "campaign {id} kept changing during deactivation"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyStore, t0};
    use chrono::Duration;
    use mailcast_core::types::Frequency;
    use mailcast_store::{MailingDb, NewCampaign};

    fn add(db: &MailingDb, start: DateTime<Utc>) -> CampaignId {
        db.create_campaign(&NewCampaign {
            start_time: start,
            end_time: Some(start + Duration::days(30)),
            frequency: Frequency::Daily,
            owner: Some(1),
            message_id: None,
            recipient_ids: vec![],
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_promotes_due_campaigns_only() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        let past = add(&db, t0() - Duration::hours(1));
        let exact = add(&db, t0());
        let future = add(&db, t0() + Duration::minutes(1));

        let advancer = StatusAdvancer::new(db.clone());
        let report = advancer.advance(t0()).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.promoted, vec![past, exact]);
        assert!(report.failures.is_empty());

        assert_eq!(db.get(future).unwrap().unwrap().status, CampaignStatus::Created);
        assert_eq!(db.get(exact).unwrap().unwrap().status, CampaignStatus::Started);
    }

    #[test]
    fn test_advance_is_idempotent() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        add(&db, t0() - Duration::days(1));
        let advancer = StatusAdvancer::new(db.clone());

        assert_eq!(advancer.advance(t0()).unwrap().promoted.len(), 1);
        let again = advancer.advance(t0()).unwrap();
        assert_eq!(again.scanned, 0);
        assert!(again.promoted.is_empty());
    }

    #[test]
    fn test_write_failure_does_not_stop_scan() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        let broken = add(&db, t0() - Duration::hours(2));
        let fine = add(&db, t0() - Duration::hours(1));
        let store = Arc::new(FlakyStore::new(db.clone()).fail_writes(broken));

        let report = StatusAdvancer::new(store).advance(t0()).unwrap();
        assert_eq!(report.promoted, vec![fine]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, broken);
        assert_eq!(db.get(broken).unwrap().unwrap().status, CampaignStatus::Created);
    }

    #[test]
    fn test_deactivated_after_listing_stays_finished() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        let id = add(&db, t0() - Duration::hours(1));
        let store = Arc::new(FlakyStore::new(db.clone()).finish_after_listing());

        let report = StatusAdvancer::new(store).advance(t0()).unwrap();
        assert_eq!(report.scanned, 1);
        assert!(report.promoted.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(db.get(id).unwrap().unwrap().status, CampaignStatus::Finished);
    }

    #[test]
    fn test_deactivate_from_any_state() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        let created = add(&db, t0() + Duration::days(1));
        let advancer = StatusAdvancer::new(db.clone());

        assert!(advancer.deactivate(created).unwrap());
        assert_eq!(db.get(created).unwrap().unwrap().status, CampaignStatus::Finished);
        assert!(!advancer.deactivate(created).unwrap());
        assert!(matches!(advancer.deactivate(999), Err(MailcastError::NotFound(_))));

        // A finished campaign is never promoted again
        let report = advancer.advance(t0() + Duration::days(2)).unwrap();
        assert!(report.promoted.is_empty());
    }
}
