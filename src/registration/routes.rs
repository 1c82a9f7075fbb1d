//! REST endpoints for tenant registration.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;

use super::model::BusinessInfo;
use super::orchestrator::StepOrchestrator;
use crate::api::{ApiError, TenantContext};

/// Shared state for registration routes.
#[derive(Clone)]
pub struct RegistrationRouteState {
    pub orchestrator: Arc<StepOrchestrator>,
}

/// POST /registration
///
/// Store the tenant's business identity. Returns 201 with the new profile,
/// or 200 with the existing one (business info is never replaced).
async fn create_registration(
    State(state): State<RegistrationRouteState>,
    tenant: TenantContext,
    Json(info): Json<BusinessInfo>,
) -> Result<impl IntoResponse, ApiError> {
    let (profile, created) = state
        .orchestrator
        .create_profile(&tenant.tenant_id, &info)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(profile)))
}

/// GET /registration
async fn get_registration(
    State(state): State<RegistrationRouteState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.orchestrator.profile(&tenant.tenant_id).await?;
    Ok(Json(profile))
}

/// POST /register
///
/// Run (or resume) the onboarding steps for the tenant.
async fn register(
    State(state): State<RegistrationRouteState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {
    info!(tenant_id = %tenant.tenant_id, "Registration run requested");
    let report = state.orchestrator.run(&tenant.tenant_id).await?;
    Ok(Json(report))
}

/// Build the registration REST routes.
pub fn registration_routes(state: RegistrationRouteState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route(
            "/registration",
            post(create_registration).get(get_registration),
        )
        .with_state(state)
}
