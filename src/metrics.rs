use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{info, warn};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize Prometheus metrics exporter
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Install the global recorder if it is not already in place. Must run
/// before any metric is recorded, or those samples are dropped.
pub fn install() {
    METRICS_HANDLE.get_or_init(init_metrics);
}

/// Metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Pre-register the counters the dashboards expect so they render as zero
/// before the first event instead of being absent.
pub fn initialize_core_metrics() {
    metrics::counter!("trips.created").absolute(0);
    metrics::counter!("polling.cycles").absolute(0);
    metrics::counter!("polling.cycle_errors").absolute(0);
    metrics::counter!("aeroapi.cache.hit").absolute(0);
    metrics::counter!("aeroapi.cache.miss").absolute(0);
    metrics::counter!("aeroapi.transient_error").absolute(0);
    metrics::counter!("aeroapi.permanent_error").absolute(0);
    metrics::counter!("notifications.sent").absolute(0);
    metrics::counter!("notifications.failed").absolute(0);
    metrics::counter!("notifications.duplicate_suppressed").absolute(0);
    metrics::counter!("notifications.cooldown_suppressed").absolute(0);
    metrics::counter!("notifications.retry.delivered").absolute(0);
    metrics::counter!("notifications.retry.failed").absolute(0);
    metrics::counter!("flight_status.history.appended").absolute(0);
    metrics::counter!("itineraries.drafts_created").absolute(0);
}

/// Start the metrics HTTP server on the given port
pub async fn start_metrics_server(port: u16) {
    METRICS_HANDLE.get_or_init(init_metrics);

    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Metrics server listening on http://{}/metrics", addr);
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Metrics server exited: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to bind metrics server on {}: {}", addr, e);
        }
    }
}
