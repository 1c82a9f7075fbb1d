//! Brand Onboard — tenant messaging-compliance onboarding service.

pub mod api;
pub mod automation;
pub mod backend;
pub mod config;
pub mod error;
pub mod registration;
pub mod store;
pub mod webhooks;
