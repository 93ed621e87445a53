//! Axum REST API handlers and the page itself

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::display::render_capture;
use crate::service::CaptureSession;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub session: Arc<CaptureSession>,
    pub jpeg_quality: u8,
    pub start_time: Instant,
}

/// Create the router: JSON/JPEG API plus the static page
pub fn create_rest_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/state", get(state_handler))
        .route("/api/capture", post(capture_handler))
        .route("/api/capture/image", get(captured_image_handler))
        .route("/api/filter/toggle", post(toggle_filter_handler))
        .route("/api/preview", get(preview_handler))
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn jpeg_response(bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        bytes,
    )
        .into_response()
}

/// Current display state and panels
async fn state_handler(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let display = state.session.display();
    Json(StateResponse::from(&display))
}

/// Start a capture cycle
async fn capture_handler(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<CaptureResponse>), ApiError> {
    let generation = state.session.capture().await.map_err(|e| {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse::new(&e.to_string(), "NO_FRAME")))
    })?;

    Ok((StatusCode::ACCEPTED, Json(CaptureResponse { generation })))
}

/// The latest captured still with the current filter applied
async fn captured_image_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let display = state.session.display();
    let cycle = display.cycle.ok_or_else(|| {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Nothing captured yet", "NO_CAPTURE")))
    })?;

    let filter = display.filter;
    let quality = state.jpeg_quality;
    let rendered = match tokio::task::spawn_blocking(move || render_capture(&cycle.frame, filter, quality)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            error!("Failed to render capture: {:#}", e);
            return Err(render_failed(&e.to_string()));
        }
        Err(e) => {
            error!("Render task aborted: {}", e);
            return Err(render_failed(&e.to_string()));
        }
    };

    Ok(jpeg_response(rendered))
}

fn render_failed(message: &str) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(message, "RENDER_FAILED")))
}

/// Toggle the grayscale filter
async fn toggle_filter_handler(State(state): State<Arc<AppState>>) -> Result<Json<FilterResponse>, ApiError> {
    let filter = state.session.toggle_filter().await.map_err(|e| {
        error!("Filter toggle failed: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(&e.to_string(), "FILTER_FAILED")))
    })?;

    Ok(Json(FilterResponse { filter }))
}

/// Live preview frame; does not touch display state
async fn preview_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    match state.session.camera().snapshot().await {
        Ok(Some(frame)) => Ok(jpeg_response(frame.jpeg)),
        Ok(None) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("No camera stream active", "NO_CAMERA")),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(&e.to_string(), "NO_CAMERA")),
        )),
    }
}

/// Health check
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let display = state.session.display();

    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        models: display.models,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
