//! HTTP surface shared by every route group: tenant context, structured
//! error responses and the assembled application router.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::automation::{AutomationBootstrapper, AutomationRouteState, automation_routes};
use crate::error::{AutomationError, DatabaseError, SagaError, WebhookError};
use crate::registration::{OnboardingStep, RegistrationRouteState, StepOrchestrator, registration_routes};
use crate::webhooks::{WebhookIngestor, WebhookRouteState, webhook_routes};

/// Header carrying the tenant id, set by the authenticating proxy.
pub const TENANT_HEADER: &str = "x-tenant-id";

// ── Error codes ─────────────────────────────────────────────────────

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TenantRequired,
    InvalidRequestBody,
    ProfileNotFound,
    ResourceNotFound,
    ForeignWorkflow,
    InconsistentState,
    StepFailed,
    ContinuationFailed,
    UpstreamFailed,
    DatabaseError,
}

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::TenantRequired => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
            ErrorCode::ProfileNotFound | ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ForeignWorkflow => StatusCode::FORBIDDEN,
            ErrorCode::InconsistentState => StatusCode::CONFLICT,
            ErrorCode::StepFailed | ErrorCode::ContinuationFailed | ErrorCode::UpstreamFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ── Structured error response ───────────────────────────────────────

/// Error body: `{ "error": { "code", "message", "step"? } }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    /// Onboarding step that failed, for step failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<OnboardingStep>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                message: message.into(),
                step: None,
            },
        }
    }

    pub fn with_step(mut self, step: OnboardingStep) -> Self {
        self.error.step = Some(step);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { .. } => ApiError::new(ErrorCode::ResourceNotFound, e.to_string()),
            DatabaseError::Constraint(_) => ApiError::new(ErrorCode::InconsistentState, e.to_string()),
            _ => {
                tracing::error!(error = %e, "Database error while serving request");
                ApiError::new(ErrorCode::DatabaseError, e.to_string())
            }
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(e: SagaError) -> Self {
        match e {
            SagaError::StepFailed { step, .. } => {
                ApiError::new(ErrorCode::StepFailed, e.to_string()).with_step(step)
            }
            SagaError::ContinuationFailed { .. } => {
                ApiError::new(ErrorCode::ContinuationFailed, e.to_string())
            }
            SagaError::InconsistentState { .. } => {
                ApiError::new(ErrorCode::InconsistentState, e.to_string())
            }
            SagaError::ProfileNotFound { .. } => {
                ApiError::new(ErrorCode::ProfileNotFound, e.to_string())
            }
            SagaError::Database(db) => db.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::Unparsable(_) => ApiError::new(ErrorCode::InvalidRequestBody, e.to_string()),
            WebhookError::AuditLog(db) | WebhookError::Database(db) => db.into(),
        }
    }
}

impl From<AutomationError> for ApiError {
    fn from(e: AutomationError) -> Self {
        match e {
            AutomationError::Backend(_) => ApiError::new(ErrorCode::UpstreamFailed, e.to_string()),
            AutomationError::ForeignWorkflow { .. } => {
                ApiError::new(ErrorCode::ForeignWorkflow, e.to_string())
            }
            AutomationError::Database(db) => db.into(),
        }
    }
}

// ── Tenant context ──────────────────────────────────────────────────

/// The authenticated tenant a request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError::new(
                    ErrorCode::TenantRequired,
                    format!("missing {TENANT_HEADER} header"),
                )
            })?;
        Ok(Self {
            tenant_id: tenant_id.to_string(),
        })
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Services the HTTP surface is built from.
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: Arc<StepOrchestrator>,
    pub ingestor: Arc<WebhookIngestor>,
    pub automation: Arc<AutomationBootstrapper>,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the full application router.
pub fn app(services: AppServices) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(registration_routes(RegistrationRouteState {
            orchestrator: services.orchestrator,
        }))
        .merge(webhook_routes(WebhookRouteState {
            ingestor: services.ingestor,
        }))
        .merge(automation_routes(AutomationRouteState {
            bootstrapper: services.automation,
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
