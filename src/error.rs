//! Error types for the onboarding service.

use std::time::Duration;

use crate::registration::steps::OnboardingStep;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Registration backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Onboarding saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from an external backend call (registration or automation API).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{operation} request failed: {reason}")]
    Request { operation: String, reason: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
}

impl BackendError {
    /// Name of the backend operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            Self::Request { operation, .. }
            | Self::Status { operation, .. }
            | Self::InvalidResponse { operation, .. }
            | Self::Timeout { operation, .. } => operation,
        }
    }
}

/// Errors raised while driving the onboarding saga.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("Onboarding step {step} failed: {source}")]
    StepFailed {
        step: OnboardingStep,
        #[source]
        source: BackendError,
    },

    #[error("Continuation step {stage} failed: {source}")]
    ContinuationFailed {
        stage: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Inconsistent registration state for tenant {tenant_id}: {reason}")]
    InconsistentState { tenant_id: String, reason: String },

    #[error("No registration profile for tenant {tenant_id}")]
    ProfileNotFound { tenant_id: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Webhook ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Unparsable webhook body: {0}")]
    Unparsable(String),

    #[error("Failed to log raw webhook event: {0}")]
    AuditLog(DatabaseError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Auto-reply automation errors.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("Automation backend call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Workflow {workflow_id} does not belong to tenant {tenant_id}")]
    ForeignWorkflow {
        workflow_id: String,
        tenant_id: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
