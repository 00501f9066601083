//! Due-ness: whether a recipient should be mailed again in this cycle.
//!
//! Only the latest attempt counts, whatever its outcome. A failed send still
//! resets the cadence clock.

use chrono::{DateTime, Utc};
use mailcast_core::types::{AttemptRecord, Campaign};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Never attempted before.
    FirstAttempt,
    /// Cadence has elapsed since the latest attempt.
    Due { days_elapsed: i64 },
    NotYet { days_elapsed: i64, cadence_days: i64 },
    /// Frequency has no cadence mapping.
    NoCadence,
    NoMessage,
}

impl Decision {
    pub fn is_due(self) -> bool {
        matches!(self, Decision::FirstAttempt | Decision::Due { .. })
    }
}

/// Whole days between `since` and `now`, rounded toward zero.
pub fn whole_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days()
}

pub fn decide(campaign: &Campaign, latest: Option<&AttemptRecord>, now: DateTime<Utc>) -> Decision {
    if campaign.message.is_none() {
        return Decision::NoMessage;
    }
    let Some(cadence_days) = campaign.cadence_days() else {
        return Decision::NoCadence;
    };
    match latest {
        None => Decision::FirstAttempt,
        Some(attempt) => {
            let days_elapsed = whole_days(attempt.attempted_at, now);
            if days_elapsed >= cadence_days {
                Decision::Due { days_elapsed }
            } else {
                Decision::NotYet {
                    days_elapsed,
                    cadence_days,
                }
            }
        }
    }
}
