//! Alert categories and their chat texts.

use crate::model::{Device, TelemetryMessage};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use std::fmt::Display;

const EVENT_TIME_FORMAT: &str = "%-d.%-m. %H:%M";

/// What a telemetry frame asks to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAlert {
    Alarm,
    Info,
}

/// Alerts requested by the frame, alarm first. Both may apply at once.
pub fn classify(msg: &TelemetryMessage) -> Vec<FrameAlert> {
    let mut alerts = Vec::with_capacity(2);
    if msg.flags.alarm() {
        alerts.push(FrameAlert::Alarm);
    }
    if msg.flags.info() {
        alerts.push(FrameAlert::Info);
    }
    alerts
}

/// Renders `alert` for `device`.
pub fn render(alert: FrameAlert, device: &Device, msg: &TelemetryMessage) -> String {
    match alert {
        FrameAlert::Alarm => alarm_text(device, msg),
        FrameAlert::Info => info_text(device, msg),
    }
}

pub fn alarm_text(device: &Device, msg: &TelemetryMessage) -> String {
    format!(
        "‼️ {} ({}) - ALARM {} ‼️",
        device.name,
        device.id,
        event_time(&msg.received_at)
    )
}

pub fn info_text(device: &Device, msg: &TelemetryMessage) -> String {
    let door = if msg.flags.door_open() { "🅾️" } else { "✅" };
    format!(
        "{} {} {} 🌡 {:.1} °C 🔋 {:.3} V",
        device.name,
        door,
        event_time(&msg.received_at),
        msg.temperature,
        msg.voltage
    )
}

/// Watchdog findings, in decreasing priority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchdogAlert {
    NeverReported,
    StoppedReporting,
    LowVoltage(f64),
}

impl WatchdogAlert {
    pub fn render(&self, device: &Device, tz: Tz) -> String {
        match self {
            WatchdogAlert::NeverReported => format!(
                "⚠️ device {} ({}) has never reported",
                device.name, device.id
            ),
            WatchdogAlert::StoppedReporting => {
                let since = device
                    .last_message_at
                    .map(|at| event_time(&at.with_timezone(&tz)))
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "⚠️ device {} ({}) has not reported since {}",
                    device.name, device.id, since
                )
            }
            WatchdogAlert::LowVoltage(voltage) => format!(
                "⚠️ device {} ({}) has low battery voltage {:.3}",
                device.name, device.id, voltage
            ),
        }
    }
}

/// `day.month. hour:minute`, the way alerts show event times.
pub fn event_time<T>(at: &DateTime<T>) -> String
where
    T: TimeZone,
    T::Offset: Display,
{
    at.format(EVENT_TIME_FORMAT).to_string()
}
