//! Inbound registration status webhooks.

pub mod event;
pub mod ingestor;
pub mod routes;

pub use event::RegistrationEvent;
pub use ingestor::{EventOutcome, IgnoreReason, ReconcileEntry, WebhookIngestor};
pub use routes::{WebhookRouteState, webhook_routes};
