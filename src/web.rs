use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::actions;
use crate::orchestrator::Orchestrator;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

// App state for sharing the database pool and the orchestrator
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub orchestrator: Orchestrator,
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

pub fn build_router(pool: PgPool, orchestrator: Orchestrator) -> Router {
    let app_state = AppState { pool, orchestrator };

    Router::new()
        .route("/trips", post(actions::create_trip))
        .route("/itinerary", post(actions::generate_itinerary))
        .route("/itinerary/{trip_id}", get(actions::get_itinerary))
        .route("/documents", post(actions::upload_document))
        .route("/documents/{trip_id}", get(actions::get_trip_documents))
        .route(
            "/webhooks/trip-confirmation",
            post(actions::trip_confirmation_webhook),
        )
        .route("/webhooks/twilio", post(actions::twilio_webhook))
        .route("/health", get(actions::health))
        .route("/scheduler/status", get(actions::scheduler_status))
        .route("/cache/stats", get(actions::cache_stats))
        .with_state(app_state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    pool: PgPool,
    orchestrator: Orchestrator,
) -> Result<()> {
    info!("Starting web server on {}:{}", interface, port);

    let app = build_router(pool, orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app).await?;

    Ok(())
}
