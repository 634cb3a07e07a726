use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sepay_shared::NoTransaction;
use serde_json::json;
use tracing::error;

use crate::api::AppState;

const ENDPOINTS: &[&str] = &[
    "POST /webhook",
    "POST /api/sepay/webhook",
    "POST /api/telegram/:token",
    "GET /last-transaction",
    "GET /history",
    "GET /health",
    "GET /",
];

pub async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.history.len().await {
        Ok(history_len) => Json(json!({
            "status": "healthy",
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "history_len": history_len,
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "history unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "unhealthy", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn last_transaction(State(state): State<Arc<AppState>>) -> Response {
    match state.history.last() {
        Some(transaction) => Json(transaction.as_ref()).into_response(),
        None => Json(NoTransaction::default()).into_response(),
    }
}

pub async fn history(State(state): State<Arc<AppState>>) -> Response {
    match state.history.history().await {
        Ok(history) => Json(history).into_response(),
        Err(err) => {
            error!(error = %err, "could not read history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "availableEndpoints": ENDPOINTS,
        })),
    )
}
