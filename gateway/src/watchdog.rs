use crate::alert::WatchdogAlert;
use crate::errors::Result;
use crate::metrics::WATCHDOG_ALERTS_TOTAL;
use crate::model::Device;
use crate::notify::{dispatch, Notifier};
use crate::storage::Storage;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info};

/// Devices silent for longer than this are reported.
pub const HEARTBEAT_STALE_HOURS: i64 = 25;

/// First matching finding for `device`, if any.
pub fn evaluate(device: &Device, now: DateTime<Utc>, voltage_limit: f64) -> Option<WatchdogAlert> {
    let stale_before = now - Duration::hours(HEARTBEAT_STALE_HOURS);

    match device.last_heartbeat_at {
        None => Some(WatchdogAlert::NeverReported),
        Some(at) if at < stale_before => Some(WatchdogAlert::StoppedReporting),
        Some(_) if device.voltage < voltage_limit => {
            Some(WatchdogAlert::LowVoltage(device.voltage))
        }
        Some(_) => None,
    }
}

/// Periodic health sweep over all known devices.
#[derive(Clone)]
pub struct Watchdog {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    voltage_limit: f64,
    tz: Tz,
}

impl Watchdog {
    pub fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        voltage_limit: f64,
        tz: Tz,
    ) -> Self {
        Self {
            storage,
            notifier,
            voltage_limit,
            tz,
        }
    }

    /// Evaluates every device and returns the number of alerts sent.
    ///
    /// The first failing device aborts the sweep; devices after it are not
    /// evaluated in this run.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let devices = self.storage.all_devices().await?;
        debug!("Watchdog evaluating {} devices", devices.len());

        let mut sent = 0;
        for device in &devices {
            let Some(alert) = evaluate(device, now, self.voltage_limit) else {
                continue;
            };

            match self.report(device, alert).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(device_id = %device.id, "watchdog alert failed, aborting sweep: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(sent)
    }

    async fn report(&self, device: &Device, alert: WatchdogAlert) -> Result<bool> {
        let chats = self.storage.all_chats(&device.id).await?;
        if chats.is_empty() {
            debug!(device_id = %device.id, "no subscribers for {:?}", alert);
            return Ok(false);
        }

        let text = alert.render(device, self.tz);
        dispatch(self.notifier.as_ref(), &device.id, &chats, &text).await?;
        WATCHDOG_ALERTS_TOTAL.inc();
        info!(device_id = %device.id, "watchdog alert {:?} sent", alert);
        Ok(true)
    }
}

/// Runs the sweep on a fixed period until the task is dropped.
pub async fn run_schedule(watchdog: Watchdog, period: std::time::Duration) {
    info!("Starting watchdog schedule every {:?}", period);
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        match watchdog.sweep(Utc::now()).await {
            Ok(sent) => debug!("Watchdog sweep finished, {} alerts", sent),
            Err(e) => error!("Watchdog sweep aborted: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::notify::MockNotifier;
    use crate::storage::MockStorage;
    use chrono::TimeZone;
    use chrono_tz::Europe::Prague;

    const LIMIT: f64 = 2.4;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 10, 12, 0, 0).unwrap()
    }

    fn device(id: &str, heartbeat_hours_ago: Option<i64>, voltage: f64) -> Device {
        Device {
            id: id.to_string(),
            name: format!("name-{}", id),
            voltage,
            access_allowed: false,
            last_message_at: heartbeat_hours_ago.map(|h| now() - Duration::hours(h)),
            last_heartbeat_at: heartbeat_hours_ago.map(|h| now() - Duration::hours(h)),
        }
    }

    #[test]
    fn test_never_reported_wins_over_low_voltage() {
        let dev = device("a", None, 1.0);
        assert_eq!(evaluate(&dev, now(), LIMIT), Some(WatchdogAlert::NeverReported));
    }

    #[test]
    fn test_stale_heartbeat() {
        let dev = device("a", Some(26), 1.0);
        assert_eq!(evaluate(&dev, now(), LIMIT), Some(WatchdogAlert::StoppedReporting));
        let fresh = device("a", Some(24), 3.0);
        assert_eq!(evaluate(&fresh, now(), LIMIT), None);
    }

    #[test]
    fn test_low_voltage() {
        let dev = device("a", Some(1), 2.2);
        assert_eq!(evaluate(&dev, now(), LIMIT), Some(WatchdogAlert::LowVoltage(2.2)));
        let at_limit = device("a", Some(1), LIMIT);
        assert_eq!(evaluate(&at_limit, now(), LIMIT), None);
    }

    #[tokio::test]
    async fn test_sweep_skips_devices_without_subscribers() {
        let mut storage = MockStorage::new();
        storage.expect_all_devices().returning(|| {
            Ok(vec![
                device("a", None, 3.0),
                device("b", Some(2), 3.0),
                device("c", Some(2), 2.0),
            ])
        });
        storage
            .expect_all_chats()
            .withf(|id| id == "a")
            .returning(|_| Ok(vec![]));
        storage
            .expect_all_chats()
            .withf(|id| id == "c")
            .returning(|_| Ok(vec![5]));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_plain_message()
            .withf(|chats, msg| chats == [5] && msg.contains("low battery voltage 2.000"))
            .times(1)
            .returning(|_, _| Ok(()));

        let watchdog = Watchdog::new(Arc::new(storage), Arc::new(notifier), LIMIT, Prague);
        assert_eq!(watchdog.sweep(now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_aborts_on_first_failure() {
        let mut storage = MockStorage::new();
        storage
            .expect_all_devices()
            .returning(|| Ok(vec![device("a", None, 3.0), device("b", None, 3.0)]));
        storage
            .expect_all_chats()
            .withf(|id| id == "a")
            .times(1)
            .returning(|_| Ok(vec![1]));
        storage
            .expect_all_chats()
            .withf(|id| id == "b")
            .never();

        let mut notifier = MockNotifier::new();
        notifier
            .expect_plain_message()
            .times(1)
            .returning(|_, _| Err(Error::Dispatch("broker gone".to_string())));

        let watchdog = Watchdog::new(Arc::new(storage), Arc::new(notifier), LIMIT, Prague);
        let err = watchdog.sweep(now()).await.unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
    }

    #[test]
    fn test_heartbeat_exactly_at_stale_limit_is_fresh() {
        let at_limit = device("a", Some(HEARTBEAT_STALE_HOURS), 3.0);
        assert_eq!(evaluate(&at_limit, now(), LIMIT), None);

        let mut just_over = at_limit.clone();
        just_over.last_heartbeat_at = just_over
            .last_heartbeat_at
            .map(|at| at - Duration::seconds(1));
        assert_eq!(
            evaluate(&just_over, now(), LIMIT),
            Some(WatchdogAlert::StoppedReporting)
        );
    }

    #[tokio::test]
    async fn test_sweep_aborts_when_chat_lookup_fails() {
        let mut storage = MockStorage::new();
        storage
            .expect_all_devices()
            .returning(|| Ok(vec![device("a", None, 3.0), device("b", None, 3.0)]));
        storage
            .expect_all_chats()
            .withf(|id| id == "a")
            .times(1)
            .returning(|_| Err(Error::Storage("chats unavailable".to_string())));
        storage
            .expect_all_chats()
            .withf(|id| id == "b")
            .never();

        let mut notifier = MockNotifier::new();
        notifier.expect_plain_message().never();

        let watchdog = Watchdog::new(Arc::new(storage), Arc::new(notifier), LIMIT, Prague);
        let err = watchdog.sweep(now()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
