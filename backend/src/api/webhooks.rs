use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use sepay_shared::WebhookResponse;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::external_services::telegram::Update;

pub async fn sepay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.handler.handle_webhook(&headers, &body).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse::failed(err.to_string())),
        )
            .into_response(),
    }
}

/**
Telegram retries anything that is not a 200, so once the token matches every
update is acknowledged, even ones we cannot read.
 */
pub async fn telegram_callback(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> StatusCode {
    let Some(telegram) = &state.telegram else {
        return StatusCode::NOT_FOUND;
    };

    if token != telegram.token() {
        warn!("telegram callback with unknown token");
        return StatusCode::NOT_FOUND;
    }

    let update = match serde_json::from_slice::<Update>(&body) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "unreadable telegram update");
            return StatusCode::OK;
        }
    };

    let Some(registration) = update.registration() else {
        debug!("telegram update ignored");
        return StatusCode::OK;
    };

    let chat = registration.chat_id();
    state.target.set(chat.clone());

    if let Err(err) = telegram.send_message(&chat, &registration.confirmation()).await {
        warn!(chat_id = %chat, error = %err, "could not confirm registration");
    }

    StatusCode::OK
}
