//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Reconciled events by kind and resulting action
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "cosmotech_operator_reconciliations_total",
        "Total number of reconciled events by action",
        &["kind", "action"]
    ).unwrap();

    /// Failed reconciliations by kind and failure class
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "cosmotech_operator_reconciliation_errors_total",
        "Total number of reconciliation errors by class",
        &["kind", "class"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "cosmotech_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0, 300.0]
    ).unwrap();

    /// Backend HTTP calls by operation and outcome
    pub static ref BACKEND_CALLS: CounterVec = register_counter_vec!(
        "cosmotech_operator_backend_calls_total",
        "Total number of backend calls by operation and outcome",
        &["operation", "outcome"]
    ).unwrap();

    /// Watch stream reconnections by kind and reason
    pub static ref WATCH_RESTARTS: CounterVec = register_counter_vec!(
        "cosmotech_operator_watch_restarts_total",
        "Total number of watch reconnections",
        &["kind", "reason"]
    ).unwrap();

    /// Events deferred because a dependency or the backend was not ready
    pub static ref DEFERRALS: CounterVec = register_counter_vec!(
        "cosmotech_operator_deferrals_total",
        "Total number of deferred events",
        &["kind"]
    ).unwrap();

    /// Last resource version seen, as a gauge when it is numeric
    pub static ref CURSOR_POSITION: GaugeVec = register_gauge_vec!(
        "cosmotech_operator_cursor_resource_version",
        "Resource version of the last processed event",
        &["kind"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "cosmotech_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Set once the watch stream has been opened
static READY: AtomicBool = AtomicBool::new(false);

/// Mark the operator ready (watch established) or not
pub fn set_ready(ready: bool) {
    READY.store(ready, Ordering::Relaxed);
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => not_found_response(),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from("Failed to encode metrics")))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    probe_response(OPERATOR_HEALTH.get() > 0.0)
}

/// Readiness check response
fn ready_response() -> Response<Full<Bytes>> {
    probe_response(READY.load(Ordering::Relaxed))
}

fn probe_response(ok: bool) -> Response<Full<Bytes>> {
    let (status, body) = if ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .unwrap()
}
