use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::engine::Monitor;
use crate::models::{Site, SiteStatus};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    uptime: String,
}

pub async fn get_sites(State(monitor): State<Arc<Monitor>>) -> Json<Vec<Site>> {
    Json(monitor.sites().to_vec())
}

pub async fn get_status(State(monitor): State<Arc<Monitor>>) -> Json<Vec<SiteStatus>> {
    let snapshot = monitor.snapshot().await;
    Json(snapshot.as_ref().clone())
}

pub async fn get_health(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime: format_uptime(monitor.uptime()),
    })
}

pub fn create_router(monitor: Arc<Monitor>) -> Router {
    with_middleware(
        Router::new()
            .route("/api/sites", get(get_sites))
            .route("/api/status", get(get_status))
            .route("/api/health", get(get_health))
            .with_state(monitor),
    )
}

fn with_middleware(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Panic caught in request handler");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// Renders a duration as `1h2m3s`, dropping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Serves the API until `shutdown` is cancelled, then drains open requests.
pub async fn start_server(
    port: u16,
    monitor: Arc<Monitor>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(monitor);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Site monitor API listening on http://localhost:{}", addr.port());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}
