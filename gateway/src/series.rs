//! Dense daily voltage series for the battery chart.

use crate::model::{Heartbeat, VoltageChart, VoltageSeries};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Days further apart than this get synthetic points in between.
const GAP_THRESHOLD_HOURS: i64 = 26;

/// Builds the chart series from samples sorted by receipt time.
///
/// Samples falling on the same calendar day are averaged into one point.
/// Missing days are filled with values interpolated linearly between the
/// neighbouring points.
pub fn build_series(samples: &[Heartbeat], tz: Tz) -> VoltageSeries {
    let mut series = VoltageSeries::default();

    for (i, sample) in samples.iter().enumerate() {
        match series.min_index {
            Some(min) if samples[min].voltage <= sample.voltage => {}
            _ => series.min_index = Some(i),
        }

        let day = local_day(sample.received_at, tz);
        let day_start = midnight(day, tz);

        let prev_start = series.days.last().cloned();
        if let (Some(prev_start), Some(prev_volt)) = (prev_start, series.volts.last_mut()) {
            if prev_start == day_start {
                *prev_volt = (*prev_volt + sample.voltage) / 2.0;
                continue;
            }

            let prev_volt = *prev_volt;
            let missing = missing_days(prev_start, day_start);
            let step = (sample.voltage - prev_volt) / (missing + 1) as f64;
            let prev_day = prev_start.date_naive();
            for n in 1..=missing {
                series.days.push(midnight(prev_day + Duration::days(n), tz));
                series.volts.push(prev_volt + step * n as f64);
            }
        }

        series.days.push(day_start);
        series.volts.push(sample.voltage);
    }

    series
}

/// Series plus its minimum annotation; `None` without samples.
pub fn build_chart(device_id: &str, samples: &[Heartbeat], tz: Tz) -> Option<VoltageChart> {
    let series = build_series(samples, tz);
    let min = &samples[series.min_index?];

    Some(VoltageChart {
        device_id: device_id.to_string(),
        min_day: midnight(local_day(min.received_at, tz), tz),
        min_voltage: min.voltage,
        series,
    })
}

fn missing_days(from: DateTime<Tz>, to: DateTime<Tz>) -> i64 {
    let threshold = Duration::hours(GAP_THRESHOLD_HOURS);
    let mut cursor = from;
    let mut missing = 0;
    while cursor + threshold < to {
        missing += 1;
        cursor = cursor + Duration::hours(24);
    }
    missing
}

fn local_day(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

fn midnight(day: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let naive = day.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}
