//! Registration saga — per-tenant onboarding through the compliance backend.
//!
//! The profile model records which steps are done, the step list declares
//! each step's postcondition, and the orchestrator drives the steps and the
//! post-verification continuation.

pub mod model;
pub mod orchestrator;
pub mod routes;
pub mod steps;

pub use model::{BrandStatus, BusinessInfo, ProfilePatch, RegistrationProfile};
pub use orchestrator::{CompliancePolicies, ContinuationOutcome, RunReport, StepOrchestrator};
pub use routes::{RegistrationRouteState, registration_routes};
pub use steps::OnboardingStep;
