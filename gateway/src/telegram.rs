use crate::chat::ChatTransport;
use crate::errors::{Error, Result};
use crate::model::VoltageChart;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    disable_notification: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", API_BASE, token),
        })
    }

    async fn send(&self, chat_id: i64, text: &str, disable_notification: bool) -> Result<()> {
        let response: ApiResponse = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&SendMessage {
                chat_id,
                text,
                disable_notification,
            })
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(Error::Dispatch(format!(
                "telegram rejected message for chat {}: {}",
                chat_id,
                response.description.unwrap_or_default()
            )));
        }
        debug!(chat_id, "telegram message sent");
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send(chat_id, text, false).await
    }

    /// Pixel rendering is left to the client; the bot sends the chart data.
    async fn send_voltage_chart(&self, chat_id: i64, chart: &VoltageChart) -> Result<()> {
        self.send(chat_id, &chart_digest(chart), true).await
    }
}

/// Text rendition of a voltage chart, one line per day.
pub fn chart_digest(chart: &VoltageChart) -> String {
    let mut out = format!(
        "🔋 {} {} ({})\n",
        chart.device_id,
        chart.min_label(),
        chart.min_day.format("%d.%m")
    );
    for (day, volts) in chart.series.days.iter().zip(&chart.series.volts) {
        let _ = writeln!(out, "{} {:.3} V", day.format("%d.%m"), volts);
    }
    out
}
