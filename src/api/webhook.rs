//! Session webhook ingest
//!
//! Receives `WhatsApp` Cloud API events: the subscription handshake on
//! GET, message payloads on POST. Ingest always answers 200 so the
//! platform does not re-deliver; processing errors are logged and the
//! event is dropped.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::ApiState;
use crate::channel::WhatsAppWebhook;

/// Hub verification query parameters
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Subscription handshake: echo the challenge when the token matches
async fn verify(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let token_matches = match (&state.verify_token, &params.verify_token) {
        (Some(expected), Some(given)) => expected == given,
        _ => false,
    };

    if params.mode.as_deref() == Some("subscribe") && token_matches {
        tracing::info!("webhook subscription verified");
        params.challenge.unwrap_or_default().into_response()
    } else {
        tracing::warn!("webhook verification rejected");
        StatusCode::FORBIDDEN.into_response()
    }
}

/// Ingest a webhook event and hand it to the channel adapter
async fn ingest(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<WhatsAppWebhook>,
) -> StatusCode {
    if let Some(channel) = &state.whatsapp {
        if let Err(e) = channel.handle_webhook(&payload).await {
            tracing::error!(error = %e, "webhook event processing failed");
        }
    } else {
        tracing::debug!("webhook event received but no session adapter is attached");
    }

    StatusCode::OK
}

/// Build the webhook router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(ingest))
        .with_state(state)
}
