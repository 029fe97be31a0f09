use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A remote sensor as recorded in storage.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub voltage: f64,
    pub access_allowed: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    /// `None` until the first heartbeat-flagged frame arrives.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// One persisted heartbeat reading.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Heartbeat {
    pub received_at: DateTime<Utc>,
    pub voltage: f64,
    pub temperature: f64,
}

/// Status bits carried in the first payload byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const ALARM: u8 = 0x80;
    pub const INFO: u8 = 0x40;
    pub const HEARTBEAT: u8 = 0x20;
    pub const DOOR_OPEN: u8 = 0x01;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn new(alarm: bool, info: bool, heartbeat: bool, door_open: bool) -> Self {
        let mut bits = 0;
        if alarm {
            bits |= Self::ALARM;
        }
        if info {
            bits |= Self::INFO;
        }
        if heartbeat {
            bits |= Self::HEARTBEAT;
        }
        if door_open {
            bits |= Self::DOOR_OPEN;
        }
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn alarm(self) -> bool {
        self.0 & Self::ALARM != 0
    }

    pub fn info(self) -> bool {
        self.0 & Self::INFO != 0
    }

    pub fn heartbeat(self) -> bool {
        self.0 & Self::HEARTBEAT != 0
    }

    pub fn door_open(self) -> bool {
        self.0 & Self::DOOR_OPEN != 0
    }
}

/// A decoded telemetry frame.
///
/// Readings that were missing or unparsable are reported as `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub device_id: String,
    pub received_at: DateTime<Tz>,
    pub ack: bool,
    pub flags: Flags,
    pub temperature: f64,
    pub voltage: f64,
}

/// Body POSTed by the radio network backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub device: String,
    pub ts: i64,
    pub data: String,
    pub ack: bool,
}

/// Downlink answer consumed by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkResponse {
    pub access_allowed: bool,
}

/// Alert event published on the fan-out topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainMessage {
    #[serde(rename = "Chats")]
    pub chats: Vec<i64>,
    #[serde(rename = "Message")]
    pub message: String,
}

/// Dense daily voltage series ready for charting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoltageSeries {
    /// Midnight of each day in the reference zone.
    pub days: Vec<DateTime<Tz>>,
    pub volts: Vec<f64>,
    /// Index into the input samples of the first global minimum.
    pub min_index: Option<usize>,
}

/// Series plus the annotated minimum, handed to the chart renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageChart {
    pub device_id: String,
    pub series: VoltageSeries,
    pub min_day: DateTime<Tz>,
    pub min_voltage: f64,
}

impl VoltageChart {
    pub fn min_label(&self) -> String {
        format!("Min {:.2}V", self.min_voltage)
    }
}

/// JSON view of a voltage series served by the REST API.
#[derive(Debug, Serialize)]
pub struct VoltageSeriesResponse {
    pub device_id: String,
    pub days: Vec<i64>,
    pub volts: Vec<f64>,
    pub min: Option<VoltagePoint>,
}

#[derive(Debug, Serialize)]
pub struct VoltagePoint {
    pub day: i64,
    pub voltage: f64,
}
