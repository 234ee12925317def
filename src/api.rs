use crate::config::ApiConfig;
use crate::error::{LabwatchError, Result};
use crate::store::StatusStore;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 500;

/// Shared state for the axum server.
#[derive(Clone)]
struct ApiState {
    store: Arc<StatusStore>,
    recent_alerts: usize,
}

/// Build the read-mostly status router. Handlers only read from the store's
/// snapshot or alert log; they never write sensor or camera state, so
/// producer cycles can never block a request.
pub fn router(store: Arc<StatusStore>, recent_alerts: usize) -> Router {
    let state = ApiState {
        store,
        recent_alerts,
    };

    Router::new()
        .route("/status", get(status_handler))
        .route("/alerts", get(alerts_handler))
        .route("/alerts/:id/ack", post(ack_handler))
        .route("/sensors/:id/history", get(history_handler))
        .route("/camera/latest", get(camera_latest_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener and serve until the token is cancelled. Returns the
/// bound address so callers (and tests) can use an ephemeral port.
pub async fn serve(
    config: &ApiConfig,
    store: Arc<StatusStore>,
    recent_alerts: usize,
    cancel: CancellationToken,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let addr = format!("{}:{}", config.ip, config.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        LabwatchError::Component {
            component: "api".to_string(),
            message: format!("failed to bind {}: {}", addr, e),
        }
    })?;
    let local_addr = listener.local_addr()?;

    info!("Status API listening on {}", local_addr);

    let app = router(store, recent_alerts);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!("Status API server error: {}", e);
        }
    });

    Ok((local_addr, handle))
}

/// Current point-in-time snapshot, including the derived health flag.
async fn status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.snapshot(state.recent_alerts))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    /// Return alerts created strictly before this instant (RFC 3339).
    before: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

/// Recent alerts, newest first, paginated by creation timestamp.
async fn alerts_handler(
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let alerts = state.store.alerts_page(query.before, limit);
    let count = alerts.len();
    Json(serde_json::json!({
        "alerts": alerts,
        "count": count,
    }))
}

/// Acknowledge an alert by id. Idempotent; unknown ids are a client error.
async fn ack_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.acknowledge_alert(id) {
        Ok(()) => Json(serde_json::json!({
            "id": id,
            "acknowledged": true,
        }))
        .into_response(),
        Err(e) => not_found(e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Recent readings for one sensor, newest first.
async fn history_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    match state.store.sensor_history(&id, limit) {
        Ok(readings) => Json(serde_json::json!({
            "sensor_id": id,
            "readings": readings,
        }))
        .into_response(),
        Err(e) => not_found(e),
    }
}

/// Latest stored camera frame as a JPEG body; callers on the far side of
/// the network cannot use the snapshot's local file path.
async fn camera_latest_handler(State(state): State<ApiState>) -> Response {
    let Some(path) = state.store.latest_capture().and_then(|c| c.file_path) else {
        return not_found("No frame captured yet");
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
            bytes,
        )
            .into_response(),
        // The retention pass may have evicted it between cycles.
        Err(e) => {
            warn!("Latest frame {} unreadable: {}", path.display(), e);
            not_found("Latest frame is no longer on disk")
        }
    }
}

fn not_found(error: impl std::fmt::Display) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
