//! Per-tenant auto-reply automation on the external automation platform.

pub mod bootstrapper;
pub mod client;
pub mod model;
pub mod routes;

pub use bootstrapper::{AutomationBootstrapper, AutomationStatus, CreatedAutomation, SyncOutcome};
pub use client::{AutomationBackend, HttpAutomationBackend};
pub use model::{AutomationWorkflow, WorkflowState};
pub use routes::{AutomationRouteState, automation_routes};
