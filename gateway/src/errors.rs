use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unauthorized request")]
    Auth,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Deadline of {0:?} exceeded")]
    Timeout(std::time::Duration),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Chat transport error: {0}")]
    Chat(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Client-caused errors, answered with a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::Auth)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
