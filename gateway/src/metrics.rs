use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TELEMETRY_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_telemetry_total",
        "Total telemetry frames received on the webhook"
    ))
    .unwrap();
    pub static ref INVALID_PAYLOADS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_invalid_payloads_total",
        "Total telemetry requests rejected as undecodable"
    ))
    .unwrap();
    pub static ref HEARTBEAT_SAVE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_heartbeat_save_failures_total",
        "Total heartbeat samples that could not be stored"
    ))
    .unwrap();
    pub static ref ALERTS_DISPATCHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_alerts_dispatched_total",
        "Total alerts published to subscribers"
    ))
    .unwrap();
    pub static ref WATCHDOG_ALERTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_watchdog_alerts_total",
        "Total alerts raised by the watchdog sweep"
    ))
    .unwrap();
    pub static ref DELIVERY_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_delivery_failures_total",
        "Total chat deliveries that failed"
    ))
    .unwrap();
    pub static ref HANDLE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gateway_handle_latency_seconds",
            "Time taken to process one telemetry frame"
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(TELEMETRY_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(INVALID_PAYLOADS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(HEARTBEAT_SAVE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ALERTS_DISPATCHED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(WATCHDOG_ALERTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DELIVERY_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(HANDLE_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
