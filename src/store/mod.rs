//! Persistence layer — libSQL-backed storage for registration profiles, the
//! raw webhook log and automation references.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{RegistrationStore, WebhookLogEntry};
