//! REST endpoints for the tenant's auto-reply automation.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::bootstrapper::{AutomationBootstrapper, ConfigureRequest};
use crate::api::{ApiError, TenantContext};

/// Shared state for automation routes.
#[derive(Clone)]
pub struct AutomationRouteState {
    pub bootstrapper: Arc<AutomationBootstrapper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    workflow_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetsBody {
    #[serde(default)]
    targets: Vec<String>,
}

/// GET /automation → `{ isExists, count, rows }`
async fn status(
    State(state): State<AutomationRouteState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.bootstrapper.status(&tenant.tenant_id).await?))
}

/// POST /automation → `{ workflowId, triggerId }`
async fn create(
    State(state): State<AutomationRouteState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.bootstrapper.create(&tenant.tenant_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /automation `{ workflowId, triggerId, templateId? }`
async fn configure(
    State(state): State<AutomationRouteState>,
    tenant: TenantContext,
    Json(body): Json<ConfigureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow = state
        .bootstrapper
        .configure(&tenant.tenant_id, &body)
        .await?;
    Ok(Json(workflow))
}

/// DELETE /automation `{ workflowId }`
async fn delete(
    State(state): State<AutomationRouteState>,
    tenant: TenantContext,
    Json(body): Json<DeleteBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .bootstrapper
        .delete(&tenant.tenant_id, &body.workflow_id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// PUT /automation/targets `{ targets: [...] }`
async fn sync_targets(
    State(state): State<AutomationRouteState>,
    tenant: TenantContext,
    Json(body): Json<TargetsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .bootstrapper
        .sync_targets(&tenant.tenant_id, &body.targets)
        .await?;
    Ok(Json(outcome))
}

/// Build the automation REST routes.
pub fn automation_routes(state: AutomationRouteState) -> Router {
    Router::new()
        .route(
            "/automation",
            get(status).post(create).put(configure).delete(delete),
        )
        .route("/automation/targets", put(sync_targets))
        .with_state(state)
}
