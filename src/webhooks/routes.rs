//! Webhook endpoints called by the registration backend.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use super::ingestor::WebhookIngestor;
use crate::api::ApiError;
use crate::error::WebhookError;

/// Shared state for webhook routes.
#[derive(Clone)]
pub struct WebhookRouteState {
    pub ingestor: Arc<WebhookIngestor>,
}

/// POST /webhooks/registration
///
/// Always acknowledges with 200 so the sender does not redeliver forever;
/// `success` is false when an event failed to apply. Only an unparsable
/// body is rejected with 400.
async fn receive(State(state): State<WebhookRouteState>, body: Bytes) -> Response {
    match state.ingestor.ingest(&body).await {
        Ok(events) => {
            let success = !events.iter().any(|e| e.is_failure());
            if !success {
                warn!(count = events.len(), "Webhook delivery had failed events");
            }
            Json(json!({ "success": success, "events": events })).into_response()
        }
        Err(WebhookError::Unparsable(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": reason })),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /webhooks/registration/reconcile
///
/// Operator retry for continuations left incomplete by earlier failures.
async fn reconcile(State(state): State<WebhookRouteState>) -> Result<impl IntoResponse, ApiError> {
    let entries = state.ingestor.reconcile().await?;
    info!(count = entries.len(), "Reconcile finished");
    let success = entries.iter().all(|e| e.error.is_none());
    Ok(Json(json!({ "success": success, "tenants": entries })))
}

/// Build the webhook routes.
pub fn webhook_routes(state: WebhookRouteState) -> Router {
    Router::new()
        .route("/webhooks/registration", post(receive))
        .route("/webhooks/registration/reconcile", post(reconcile))
        .with_state(state)
}
