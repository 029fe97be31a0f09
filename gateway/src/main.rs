use axum::{routing::get, Router};
use gateway::chat::{ChatCommands, ChatTransport, Delivery};
use gateway::config::Config;
use gateway::handler::TelemetryHandler;
use gateway::notify::Notifier;
use gateway::rest::{self, AppState};
use gateway::storage::{self, PgStorage, Storage};
use gateway::telegram::TelegramTransport;
use gateway::watchdog::{self, Watchdog};
use gateway::{metrics, mqtt};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Starting telemetry gateway");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
    info!("Reference time zone: {}", config.tz);

    metrics::init_metrics();

    let pool = match storage::make_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));

    let transport: Option<Arc<dyn ChatTransport>> = match &config.telegram_bot_token {
        Some(token) => match TelegramTransport::new(token) {
            Ok(t) => Some(Arc::new(t)),
            Err(e) => {
                error!("Failed to initialize chat transport: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, alert delivery disabled");
            None
        }
    };

    let client_id = format!("gateway-{}", uuid::Uuid::new_v4());
    let (client, eventloop) = mqtt::connect(&config.mqtt_broker, config.mqtt_port, &client_id);
    let link = mqtt::LinkState::default();
    let notifier: Arc<dyn Notifier> = Arc::new(mqtt::MqttNotifier::new(
        client.clone(),
        config.alert_topic.clone(),
        link.clone(),
    ));

    let delivery = transport.clone().map(Delivery::new);
    let topic = config.alert_topic.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_event_loop(client, eventloop, topic, link, delivery).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let watchdog = Watchdog::new(
        storage.clone(),
        notifier.clone(),
        config.voltage_limit,
        config.tz,
    );
    let watchdog_handle = tokio::spawn({
        let watchdog = watchdog.clone();
        let period = config.watchdog_interval;
        async move {
            match period {
                Some(period) => watchdog::run_schedule(watchdog, period).await,
                None => {
                    info!("In-process watchdog schedule disabled");
                    std::future::pending::<()>().await
                }
            }
        }
    });

    let state = AppState {
        handler: TelemetryHandler::new(storage.clone(), notifier),
        watchdog,
        commands: ChatCommands::new(storage.clone(), transport, config.tz),
        storage,
        device_key: config.device_key.clone(),
        telegram_key: config.telegram_webhook_key.clone(),
        tz: config.tz,
        timeout: config.request_timeout,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = watchdog_handle => {
            error!("Watchdog task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
