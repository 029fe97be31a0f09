use crate::errors::{Error, Result};
use crate::model::{Flags, TelemetryMessage, UplinkResponse, WebhookPayload};
use chrono::TimeZone;
use chrono_tz::Tz;
use tracing::warn;

/// Length of the downlink frame in bytes.
pub const UPLINK_FRAME_LEN: usize = 8;

const READINGS_MIN_LEN: usize = 4;

/// Parses the webhook JSON body and decodes the frame it carries.
pub fn decode_webhook(body: &[u8], tz: Tz) -> Result<TelemetryMessage> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| Error::Decode(format!("JSON parse error: {}", e)))?;

    decode(&payload.device, payload.ts, &payload.data, payload.ack, tz)
}

/// Decodes a hex frame received from `device_id` at epoch `ts`.
///
/// Only a malformed hex string (or an unrepresentable timestamp) fails.
/// Missing or garbled readings degrade to `0.0` so the flags still drive
/// alerting.
pub fn decode(device_id: &str, ts: i64, data: &str, ack: bool, tz: Tz) -> Result<TelemetryMessage> {
    let payload = hex::decode(data)
        .map_err(|e| Error::Decode(format!("can't decode hex payload {:?}: {}", data, e)))?;

    let received_at = tz
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| Error::Decode(format!("timestamp {} out of range", ts)))?;

    Ok(TelemetryMessage {
        device_id: device_id.to_string(),
        received_at,
        ack,
        flags: flags(&payload),
        temperature: temperature(&payload).unwrap_or_default(),
        voltage: voltage(&payload).unwrap_or_default(),
    })
}

/// Flag byte; an empty payload carries no flags.
pub fn flags(payload: &[u8]) -> Flags {
    payload
        .first()
        .copied()
        .map(Flags::from_bits)
        .unwrap_or_default()
}

/// Temperature in °C, three ASCII digits with one implied decimal.
pub fn temperature(payload: &[u8]) -> Option<f64> {
    if payload.len() < READINGS_MIN_LEN {
        return None;
    }
    parse_scaled(&payload[1..4], 10.0, "temperature")
}

/// Battery voltage in V, ASCII digits with three implied decimals.
pub fn voltage(payload: &[u8]) -> Option<f64> {
    if payload.len() < READINGS_MIN_LEN {
        return None;
    }
    parse_scaled(&payload[4..], 1000.0, "voltage")
}

fn parse_scaled(raw: &[u8], scale: f64, field: &str) -> Option<f64> {
    let parsed = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok());

    match parsed {
        Some(v) => Some(v as f64 / scale),
        None => {
            warn!(field, raw = %String::from_utf8_lossy(raw), "reading parse error");
            None
        }
    }
}

impl UplinkResponse {
    /// Lowercase hex of the fixed 8 byte downlink frame.
    pub fn encode(&self) -> String {
        let mut frame = [0u8; UPLINK_FRAME_LEN];
        if self.access_allowed {
            frame[0] = 0x01;
        }
        hex::encode(frame)
    }
}
