use crate::alert::{classify, render};
use crate::errors::Result;
use crate::metrics::{HANDLE_LATENCY_SECONDS, HEARTBEAT_SAVE_FAILURES_TOTAL};
use crate::model::{TelemetryMessage, UplinkResponse};
use crate::notify::{dispatch, Notifier};
use crate::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Runs one decoded telemetry frame through state update and alerting.
#[derive(Clone)]
pub struct TelemetryHandler {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
}

impl TelemetryHandler {
    pub fn new(storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Self {
        Self { storage, notifier }
    }

    /// Processes `msg` and returns the downlink answer.
    ///
    /// The access bit reflects the device as loaded before this frame's
    /// updates. Heartbeat persistence is best effort; every other storage or
    /// dispatch failure fails the request.
    #[instrument(skip(self, msg), fields(device_id = %msg.device_id, flags = msg.flags.bits()))]
    pub async fn handle(&self, msg: &TelemetryMessage) -> Result<UplinkResponse> {
        let _timer = HANDLE_LATENCY_SECONDS.start_timer();

        let Some(device) = self.storage.device(&msg.device_id).await? else {
            warn!("telemetry from unknown device");
            return Ok(UplinkResponse::default());
        };
        let response = UplinkResponse {
            access_allowed: device.access_allowed,
        };

        let at = msg.received_at.with_timezone(&Utc);
        self.storage.save_timestamp(&device.id, at).await?;

        if msg.flags.heartbeat() {
            if let Err(e) = self
                .storage
                .save_heartbeat(&device.id, at, msg.voltage, msg.temperature)
                .await
            {
                HEARTBEAT_SAVE_FAILURES_TOTAL.inc();
                warn!("heartbeat not stored: {}", e);
            }
        }

        let alerts = classify(msg);
        if alerts.is_empty() {
            debug!("nothing to report");
            return Ok(response);
        }

        let chats = self.storage.all_chats(&device.id).await?;
        if chats.is_empty() {
            debug!("no subscribers");
            return Ok(response);
        }

        for alert in alerts {
            let text = render(alert, &device, msg);
            dispatch(self.notifier.as_ref(), &device.id, &chats, &text).await?;
        }

        Ok(response)
    }
}
