//! # Mailcast Store
//!
//! SQLite persistence for the dispatcher. [`MailingDb`] is both the
//! [`CampaignStore`](mailcast_core::CampaignStore) and the append-only
//! [`AttemptLog`](mailcast_core::AttemptLog), and also carries the
//! administrative writes (creating recipients, messages and campaigns)
//! that the surrounding application performs.

pub mod db;

pub use db::{MailingDb, NewCampaign, NewRecipient};
