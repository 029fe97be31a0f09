use crate::chat::{ChatCommands, Update, CHART_HISTORY_LIMIT};
use crate::codec::decode_webhook;
use crate::errors::{Error, Result};
use crate::handler::TelemetryHandler;
use crate::metrics::{INVALID_PAYLOADS_TOTAL, TELEMETRY_TOTAL};
use crate::model::{VoltagePoint, VoltageSeriesResponse};
use crate::series::build_chart;
use crate::storage::Storage;
use crate::watchdog::Watchdog;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Header carrying the pre-shared key.
pub const AUTH_HEADER: &str = "X-AuthKey";

#[derive(Clone)]
pub struct AppState {
    pub handler: TelemetryHandler,
    pub watchdog: Watchdog,
    pub commands: ChatCommands,
    pub storage: Arc<dyn Storage>,
    pub device_key: String,
    pub telegram_key: Option<String>,
    pub tz: Tz,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    k: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/device", post(device_webhook))
        .route("/telegram", post(telegram_webhook))
        .route("/watchdog", post(watchdog_trigger))
        .route("/api/v1/devices/:id/voltage", get(get_voltage_series))
        .with_state(state)
}

async fn device_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, AppError> {
    TELEMETRY_TOTAL.inc();
    authorize(&headers, &state.device_key)?;

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/json");
    if !is_json {
        return Err(Error::Decode("invalid content-type".to_string()).into());
    }

    let msg = decode_webhook(&body, state.tz).map_err(|e| {
        INVALID_PAYLOADS_TOTAL.inc();
        warn!("payload decoding error: {}", e);
        e
    })?;

    let uplink = with_deadline(state.timeout, state.handler.handle(&msg))
        .await
        .map_err(|e| {
            error!(device_id = %msg.device_id, "handle device message failed: {}", e);
            e
        })?;

    if !msg.ack {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut downlink = BTreeMap::new();
    downlink.insert(
        msg.device_id.clone(),
        BTreeMap::from([("downlinkData", uplink.encode())]),
    );
    Ok((StatusCode::OK, Json(downlink)).into_response())
}

async fn telegram_webhook(
    State(state): State<AppState>,
    Query(params): Query<ChatQuery>,
    body: Bytes,
) -> std::result::Result<StatusCode, AppError> {
    let authorized = matches!(
        (&params.k, &state.telegram_key),
        (Some(given), Some(expected)) if given == expected
    );
    if !authorized {
        warn!("unauthorized chat webhook request");
        return Err(Error::Auth.into());
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => {
            if let Err(e) = with_deadline(state.timeout, state.commands.handle(&update)).await {
                error!("chat command processing failed: {}", e);
            }
        }
        Err(e) => warn!("chat update decoding error: {}", e),
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn watchdog_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, AppError> {
    authorize(&headers, &state.device_key)?;

    let sent = with_deadline(state.timeout, state.watchdog.sweep(Utc::now())).await?;
    info!("Watchdog sweep triggered, {} alerts sent", sent);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_voltage_series(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> std::result::Result<Json<VoltageSeriesResponse>, AppError> {
    authorize(&headers, &state.device_key)?;

    let samples = state
        .storage
        .heartbeats(&device_id, CHART_HISTORY_LIMIT)
        .await?;

    let response = match build_chart(&device_id, &samples, state.tz) {
        Some(chart) => VoltageSeriesResponse {
            device_id,
            days: chart.series.days.iter().map(|d| d.timestamp()).collect(),
            volts: chart.series.volts.clone(),
            min: Some(VoltagePoint {
                day: chart.min_day.timestamp(),
                voltage: chart.min_voltage,
            }),
        },
        None => VoltageSeriesResponse {
            device_id,
            days: Vec::new(),
            volts: Vec::new(),
            min: None,
        },
    };

    Ok(Json(response))
}

fn authorize(headers: &HeaderMap, key: &str) -> Result<()> {
    match headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == key => Ok(()),
        _ => Err(Error::Auth),
    }
}

async fn with_deadline<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Decode(_) => (StatusCode::BAD_REQUEST, "payload error"),
            Error::Auth => (StatusCode::FORBIDDEN, "forbidden"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };
        if !self.0.is_client_error() {
            error!("API error: {}", self.0);
        }
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Device;
    use crate::notify::MockNotifier;
    use crate::storage::MockStorage;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono_tz::Europe::Prague;
    use tower::ServiceExt;

    const KEY: &str = "secret";

    fn router(storage: MockStorage, notifier: MockNotifier) -> Router {
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let notifier: Arc<MockNotifier> = Arc::new(notifier);
        create_router(AppState {
            handler: TelemetryHandler::new(storage.clone(), notifier.clone()),
            watchdog: Watchdog::new(storage.clone(), notifier, 2.4, Prague),
            commands: ChatCommands::new(storage.clone(), None, Prague),
            storage,
            device_key: KEY.to_string(),
            telegram_key: Some("chatkey".to_string()),
            tz: Prague,
            timeout: Duration::from_secs(5),
        })
    }

    fn telemetry_request(key: &str, content_type: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/device")
            .header(AUTH_HEADER, key)
            .header("Content-type", content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn known_device() -> MockStorage {
        let mut storage = MockStorage::new();
        storage.expect_device().returning(|_| {
            Ok(Some(Device {
                id: "1A2B".to_string(),
                name: "Garage".to_string(),
                voltage: 3.0,
                access_allowed: true,
                last_message_at: None,
                last_heartbeat_at: None,
            }))
        });
        storage.expect_save_timestamp().returning(|_, _| Ok(()));
        storage
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let response = router(MockStorage::new(), MockNotifier::new())
            .oneshot(Request::builder().uri("/device").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_wrong_key_is_forbidden() {
        let response = router(MockStorage::new(), MockNotifier::new())
            .oneshot(telemetry_request("nope", "application/json", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_bad_request() {
        let response = router(MockStorage::new(), MockNotifier::new())
            .oneshot(telemetry_request(KEY, "text/plain", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_hex_is_bad_request() {
        let body = r#"{"device":"1A2B","ts":1610710200,"data":"xyz","ack":true}"#;
        let response = router(MockStorage::new(), MockNotifier::new())
            .oneshot(telemetry_request(KEY, "application/json", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ack_returns_downlink() {
        let body = r#"{"device":"1A2B","ts":1610710200,"data":"00","ack":true}"#;
        let response = router(known_device(), MockNotifier::new())
            .oneshot(telemetry_request(KEY, "application/json", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["1A2B"]["downlinkData"], "0100000000000000");
    }

    #[tokio::test]
    async fn test_no_ack_returns_no_content() {
        let body = r#"{"device":"1A2B","ts":1610710200,"data":"00","ack":false}"#;
        let response = router(known_device(), MockNotifier::new())
            .oneshot(telemetry_request(KEY, "application/json", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_storage_failure_is_generic_500() {
        let mut storage = MockStorage::new();
        storage
            .expect_device()
            .returning(|_| Err(Error::Storage("connection refused on 10.0.0.5".to_string())));

        let body = r#"{"device":"1A2B","ts":1610710200,"data":"00","ack":true}"#;
        let response = router(storage, MockNotifier::new())
            .oneshot(telemetry_request(KEY, "application/json", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"internal error");
    }

    #[tokio::test]
    async fn test_chat_webhook_requires_key() {
        let response = router(MockStorage::new(), MockNotifier::new())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/telegram?k=wrong")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_chat_webhook_ignores_garbage() {
        let response = router(MockStorage::new(), MockNotifier::new())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/telegram?k=chatkey")
                    .body(Body::from("not an update"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_watchdog_trigger() {
        let mut storage = MockStorage::new();
        storage.expect_all_devices().returning(|| Ok(vec![]));

        let response = router(storage, MockNotifier::new())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/watchdog")
                    .header(AUTH_HEADER, KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
