use crate::errors::{Error, Result};
use crate::metrics::ALERTS_DISPATCHED_TOTAL;
use async_trait::async_trait;
use tracing::debug;

/// Fan-out of alert texts to subscriber chats.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn plain_message(&self, chats: &[i64], message: &str) -> Result<()>;
}

/// Sends `message` to `chats`, reporting any failure as a dispatch error.
pub async fn dispatch(
    notifier: &dyn Notifier,
    device_id: &str,
    chats: &[i64],
    message: &str,
) -> Result<()> {
    notifier
        .plain_message(chats, message)
        .await
        .map_err(|e| match e {
            Error::Dispatch(_) => e,
            other => Error::Dispatch(format!("alert for device {} failed: {}", device_id, other)),
        })?;

    ALERTS_DISPATCHED_TOTAL.inc();
    debug!(device_id, chats = chats.len(), "alert dispatched");
    Ok(())
}
