//! Operator alert channel: best effort, failures are logged and dropped.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait OperatorAlert: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, subject: &str, detail: &str) -> Result<()>;
}
