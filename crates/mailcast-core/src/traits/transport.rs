//! Mail transport: hands one message to a relay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// What the relay accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    /// Number of recipients the relay accepted. Zero means nothing was delivered.
    pub accepted: usize,
    /// Short server response code, if the relay reported one.
    pub response_code: Option<String>,
}

impl SendReport {
    pub fn accepted(count: usize) -> Self {
        Self {
            accepted: count,
            response_code: None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Send `subject`/`body` from `from` to every address in `to`.
    async fn send(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        to: &[String],
    ) -> Result<SendReport, TransportError>;
}
