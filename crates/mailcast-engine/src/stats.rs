//! Per-owner aggregate counts, cached for a configurable time.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use mailcast_core::config::CacheConfig;
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::CampaignStore;
use mailcast_core::types::{CampaignStatus, OwnerId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OwnerStats {
    pub total_campaigns: usize,
    /// Campaigns currently `started`.
    pub active_campaigns: usize,
    pub unique_recipient_addresses: usize,
}

pub struct StatisticsCache {
    store: Arc<dyn CampaignStore>,
    enabled: bool,
    ttl: Duration,
    entries: Mutex<HashMap<OwnerId, (DateTime<Utc>, OwnerStats)>>,
}

impl StatisticsCache {
    pub fn new(store: Arc<dyn CampaignStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            // Out-of-range TTLs saturate: the entry simply never expires
            ttl: i64::try_from(config.ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stats for `owner`, served from cache while younger than the TTL.
    pub fn get_stats(&self, owner: OwnerId, now: DateTime<Utc>) -> Result<OwnerStats> {
        if !self.enabled {
            return self.compute(owner);
        }
        if let Some((computed_at, stats)) = self.entries()?.get(&owner).copied() {
            if now - computed_at < self.ttl {
                return Ok(stats);
            }
        }
        let stats = self.compute(owner)?;
        self.entries()?.insert(owner, (now, stats));
        Ok(stats)
    }

    /// Drop the cached entry so the next read recomputes.
    pub fn invalidate(&self, owner: OwnerId) {
        if let Ok(mut entries) = self.entries() {
            entries.remove(&owner);
        }
    }

    pub fn compute(&self, owner: OwnerId) -> Result<OwnerStats> {
        let campaigns = self.store.list_by_owner(owner)?;
        let recipients = self.store.recipients_by_owner(owner)?;
        let addresses: HashSet<String> = recipients
            .iter()
            .map(|r| r.email.trim().to_lowercase())
            .collect();
        Ok(OwnerStats {
            total_campaigns: campaigns.len(),
            active_campaigns: campaigns
                .iter()
                .filter(|c| c.status == CampaignStatus::Started)
                .count(),
            unique_recipient_addresses: addresses.len(),
        })
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<OwnerId, (DateTime<Utc>, OwnerStats)>>> {
        self.entries
            .lock()
            .map_err(|e| MailcastError::Other(format!("stats cache poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Seed, t0};
    use mailcast_store::{MailingDb, NewRecipient};

    fn cache(db: &Arc<MailingDb>, enabled: bool) -> StatisticsCache {
        StatisticsCache::new(
            db.clone(),
            &CacheConfig {
                enabled,
                ttl_secs: 60,
            },
        )
    }

    #[test]
    fn test_counts_are_scoped_to_owner() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        Seed {
            emails: &["a@example.com", "b@example.com"],
            ..Default::default()
        }
        .insert(&db);
        Seed {
            emails: &["A@example.com"],
            status: CampaignStatus::Created,
            ..Default::default()
        }
        .insert(&db);
        Seed {
            emails: &["z@example.com"],
            owner: 2,
            ..Default::default()
        }
        .insert(&db);

        let stats = cache(&db, true);
        assert_eq!(
            stats.get_stats(1, t0()).unwrap(),
            OwnerStats {
                total_campaigns: 2,
                active_campaigns: 1,
                unique_recipient_addresses: 2,
            }
        );
        // A different owner never sees the first owner's cached entry
        assert_eq!(stats.get_stats(2, t0()).unwrap().total_campaigns, 1);
        assert_eq!(stats.get_stats(2, t0()).unwrap().unique_recipient_addresses, 1);
    }

    #[test]
    fn test_cache_serves_until_ttl_then_recomputes() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        Seed::default().insert(&db);
        let stats = cache(&db, true);
        assert_eq!(stats.get_stats(1, t0()).unwrap().total_campaigns, 1);

        Seed::default().insert(&db);
        assert_eq!(stats.get_stats(1, t0() + Duration::seconds(59)).unwrap().total_campaigns, 1);
        assert_eq!(stats.get_stats(1, t0() + Duration::seconds(60)).unwrap().total_campaigns, 2);
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        Seed::default().insert(&db);
        for ttl_secs in [10_000_000_000_000_000, u64::MAX] {
            let stats = StatisticsCache::new(
                db.clone(),
                &CacheConfig {
                    enabled: true,
                    ttl_secs,
                },
            );
            let first = stats.get_stats(1, t0()).unwrap();
            Seed::default().insert(&db);
            assert_eq!(stats.get_stats(1, t0() + Duration::days(3650)).unwrap(), first);
        }
    }

    #[test]
    fn test_invalidate_and_disabled_mode() {
        let db = Arc::new(MailingDb::open_in_memory().unwrap());
        let stats = cache(&db, true);
        assert_eq!(stats.get_stats(1, t0()).unwrap(), OwnerStats::default());

        db.create_recipient(&NewRecipient {
            email: "new@example.com".into(),
            name: "New".into(),
            comment: None,
            owner: Some(1),
        })
        .unwrap();
        assert_eq!(stats.get_stats(1, t0()).unwrap().unique_recipient_addresses, 0);
        stats.invalidate(1);
        assert_eq!(stats.get_stats(1, t0()).unwrap().unique_recipient_addresses, 1);

        let uncached = cache(&db, false);
        assert_eq!(uncached.get_stats(1, t0()).unwrap().unique_recipient_addresses, 1);
        Seed::default().insert(&db);
        assert_eq!(uncached.get_stats(1, t0()).unwrap().total_campaigns, 1);
    }
}
