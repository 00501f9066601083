//! Error taxonomy shared by every mailcast crate.
//!
//! None of these are fatal to a dispatch cycle: the engine records them per
//! item and keeps going, leaving unresolved work for the next invocation.

use thiserror::Error;

use crate::types::{CampaignId, CampaignStatus};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MailcastError>;

#[derive(Debug, Error)]
pub enum MailcastError {
    /// Connectivity or protocol failure while handing a message to the relay.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Store or attempt-log failure. Aborts the current item only.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid or incomplete configuration (bad frequency, missing message, bad config file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A lifecycle move the state machine does not allow.
    #[error("Invalid status transition for campaign {campaign}: {from} -> {to}")]
    InvalidTransition {
        campaign: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operator alert delivery failed.
    #[error("Alert error: {0}")]
    Alert(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure reported by a [`Transport`](crate::traits::Transport).
///
/// `code` carries the short server response code when the relay produced one
/// (`"550"`, `"421"`), and is copied verbatim into the attempt record.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl MailcastError {
    /// Shorthand used by store implementations to wrap backend errors.
    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        MailcastError::Persistence(format!("{context}: {err}"))
    }
}
