//! # Mailcast Core
//!
//! Shared vocabulary for the mailing dispatcher: the campaign model, the
//! error taxonomy, configuration, and the collaborator traits (clock,
//! transport, operator alert, campaign store, attempt log) that the engine
//! is written against.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MailcastConfig;
pub use error::{MailcastError, Result, TransportError};
pub use traits::{
    AttemptLog, CampaignStore, Clock, FixedClock, OperatorAlert, SendReport, SystemClock,
    Transport,
};
pub use types::{
    AttemptOutcome, AttemptRecord, Campaign, CampaignId, CampaignStatus, Frequency,
    MessageContent, NewAttempt, OwnerId, Recipient, RecipientId,
};
