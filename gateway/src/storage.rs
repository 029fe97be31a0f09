use crate::errors::{Error, Result};
use crate::model::{Device, Heartbeat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

/// Device, subscriber and heartbeat records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// `None` when the device is not registered.
    async fn device(&self, device_id: &str) -> Result<Option<Device>>;

    async fn all_devices(&self) -> Result<Vec<Device>>;

    /// Subscribed chat ids, in registration order.
    async fn all_chats(&self, device_id: &str) -> Result<Vec<i64>>;

    async fn save_timestamp(&self, device_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Appends a sample and updates last-heartbeat time and voltage.
    async fn save_heartbeat(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
        voltage: f64,
        temperature: f64,
    ) -> Result<()>;

    /// Subscribes `chat_id`; unknown devices are ignored.
    async fn add_subscriber(&self, device_id: &str, chat_id: i64, username: &str) -> Result<()>;

    /// The `limit` most recent samples, oldest first.
    async fn heartbeats(&self, device_id: &str, limit: i64) -> Result<Vec<Heartbeat>>;
}

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DEVICE_COLUMNS: &str =
    "id, name, voltage, access_allowed, last_message_at, last_heartbeat_at";

fn storage_err(op: &str, device_id: &str) -> impl FnOnce(sqlx::Error) -> Error {
    let context = format!("{} for device {} failed", op, device_id);
    move |e| Error::Storage(format!("{}: {}", context, e))
}

#[async_trait]
impl Storage for PgStorage {
    async fn device(&self, device_id: &str) -> Result<Option<Device>> {
        let query = format!("SELECT {} FROM devices WHERE id = $1", DEVICE_COLUMNS);
        sqlx::query_as::<_, Device>(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("device lookup", device_id))
    }

    async fn all_devices(&self) -> Result<Vec<Device>> {
        let query = format!("SELECT {} FROM devices ORDER BY id", DEVICE_COLUMNS);
        sqlx::query_as::<_, Device>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("can't retrieve devices: {}", e)))
    }

    async fn all_chats(&self, device_id: &str) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT chat_id FROM chats WHERE device_id = $1 ORDER BY created_at, chat_id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("chat lookup", device_id))
    }

    async fn save_timestamp(&self, device_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE devices SET last_message_at = $2 WHERE id = $1")
            .bind(device_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(storage_err("timestamp update", device_id))?;
        Ok(())
    }

    async fn save_heartbeat(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
        voltage: f64,
        temperature: f64,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err("heartbeat save", device_id))?;

        sqlx::query("UPDATE devices SET last_heartbeat_at = $2, voltage = $3 WHERE id = $1")
            .bind(device_id)
            .bind(at)
            .bind(voltage)
            .execute(&mut *tx)
            .await
            .map_err(storage_err("heartbeat save", device_id))?;

        sqlx::query(
            r#"
            INSERT INTO heartbeats (device_id, received_at, voltage, temperature)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id, received_at)
            DO UPDATE SET voltage = EXCLUDED.voltage, temperature = EXCLUDED.temperature
            "#,
        )
        .bind(device_id)
        .bind(at)
        .bind(voltage)
        .bind(temperature)
        .execute(&mut *tx)
        .await
        .map_err(storage_err("heartbeat save", device_id))?;

        tx.commit()
            .await
            .map_err(storage_err("heartbeat save", device_id))?;
        debug!(device_id, "heartbeat stored");
        Ok(())
    }

    async fn add_subscriber(&self, device_id: &str, chat_id: i64, username: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO chats (device_id, chat_id, username, created_at)
            SELECT id, $2, $3, now() FROM devices WHERE id = $1
            ON CONFLICT (device_id, chat_id) DO UPDATE SET username = EXCLUDED.username
            "#,
        )
        .bind(device_id)
        .bind(chat_id)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(storage_err("subscriber registration", device_id))?;

        if result.rows_affected() == 0 {
            debug!(device_id, chat_id, "registration for unknown device ignored");
        }
        Ok(())
    }

    async fn heartbeats(&self, device_id: &str, limit: i64) -> Result<Vec<Heartbeat>> {
        let mut samples = sqlx::query_as::<_, Heartbeat>(
            r#"
            SELECT received_at, voltage, temperature
            FROM heartbeats
            WHERE device_id = $1
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("heartbeat history", device_id))?;

        samples.reverse();
        Ok(samples)
    }
}
