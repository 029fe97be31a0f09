//! Chat bot side: inbound commands and outbound delivery.

use crate::errors::Result;
use crate::metrics::DELIVERY_FAILURES_TOTAL;
use crate::model::{PlainMessage, VoltageChart};
use crate::series::build_chart;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Heartbeats fetched for one chart.
pub const CHART_HISTORY_LIMIT: i64 = 60;

const ARG_TRIM: &[char] = &[' ', '\n', '\t', '\r', '"'];

/// Outbound side of the chat bot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_voltage_chart(&self, chat_id: i64, chart: &VoltageChart) -> Result<()>;
}

/// The subset of a Telegram update the bot reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register(String),
    Voltage(String),
}

impl Command {
    /// Parses `/name[@bot] args`. Anything else yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.find(char::is_whitespace) {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or_default();
        let arg = args.trim_matches(ARG_TRIM).to_string();

        match name {
            "register" => Some(Command::Register(arg)),
            "voltage" => Some(Command::Voltage(arg)),
            _ => None,
        }
    }
}

/// Executes bot commands sent by users.
#[derive(Clone)]
pub struct ChatCommands {
    storage: Arc<dyn Storage>,
    transport: Option<Arc<dyn ChatTransport>>,
    tz: Tz,
}

impl ChatCommands {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Option<Arc<dyn ChatTransport>>,
        tz: Tz,
    ) -> Self {
        Self {
            storage,
            transport,
            tz,
        }
    }

    pub async fn handle(&self, update: &Update) -> Result<()> {
        let Some(message) = &update.message else {
            return Ok(());
        };
        let Some(command) = message.text.as_deref().and_then(Command::parse) else {
            return Ok(());
        };

        match command {
            Command::Register(device_id) => {
                let username = message.chat.username.as_deref().unwrap_or_default();
                self.storage
                    .add_subscriber(&device_id, message.chat.id, username)
                    .await?;
                info!(device_id = %device_id, chat_id = message.chat.id, "subscriber registered");
                Ok(())
            }
            Command::Voltage(device_id) if device_id.is_empty() => Ok(()),
            Command::Voltage(device_id) => self.voltage_chart(&device_id, message.chat.id).await,
        }
    }

    async fn voltage_chart(&self, device_id: &str, chat_id: i64) -> Result<()> {
        let Some(transport) = &self.transport else {
            warn!("chart requested but no chat transport is configured");
            return Ok(());
        };

        let samples = self.storage.heartbeats(device_id, CHART_HISTORY_LIMIT).await?;
        match build_chart(device_id, &samples, self.tz) {
            Some(chart) => transport.send_voltage_chart(chat_id, &chart).await,
            None => {
                debug!(device_id, "no heartbeats to chart");
                Ok(())
            }
        }
    }
}

/// Delivers fan-out events to every listed chat.
#[derive(Clone)]
pub struct Delivery {
    transport: Arc<dyn ChatTransport>,
}

impl Delivery {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Sends to all chats even when some fail; returns the first failure.
    pub async fn deliver(&self, msg: &PlainMessage) -> Result<()> {
        let mut first_err = None;

        for &chat_id in &msg.chats {
            if let Err(e) = self.transport.send_message(chat_id, &msg.message).await {
                DELIVERY_FAILURES_TOTAL.inc();
                warn!(chat_id, "delivery failed: {}", e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
