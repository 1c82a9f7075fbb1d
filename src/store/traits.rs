//! `RegistrationStore` trait — single async interface for all persistence.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::automation::model::AutomationWorkflow;
use crate::error::DatabaseError;
use crate::registration::model::{
    BusinessInfo, ExternalIdKind, ProfilePatch, RegistrationProfile,
};

/// A raw webhook delivery as received.
#[derive(Debug, Clone)]
pub struct WebhookLogEntry {
    pub id: Uuid,
    pub source: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Backend-agnostic store for registration profiles, the webhook log and
/// automation references.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    /// Create the tenant's profile. If one already exists it is returned
    /// unchanged and the flag is `false`.
    async fn create_profile(
        &self,
        tenant_id: &str,
        business_info: &BusinessInfo,
    ) -> Result<(RegistrationProfile, bool), DatabaseError>;

    async fn get_profile(&self, tenant_id: &str)
    -> Result<Option<RegistrationProfile>, DatabaseError>;

    /// Merge `patch` into an existing profile and return the merged result.
    ///
    /// Identifier fields are set-once; stored values win. Brand errors are
    /// appended with duplicates skipped. Continuation identifiers are only
    /// accepted when the stored brand status is `verified`, otherwise
    /// [`DatabaseError::Constraint`] is returned.
    async fn merge_profile(
        &self,
        tenant_id: &str,
        patch: &ProfilePatch,
    ) -> Result<RegistrationProfile, DatabaseError>;

    /// Reverse lookup by an externally issued identifier.
    async fn find_by_external_id(
        &self,
        kind: ExternalIdKind,
        external_id: &str,
    ) -> Result<Option<RegistrationProfile>, DatabaseError>;

    /// Claim the right to run the continuation for a tenant.
    ///
    /// Succeeds only while the brand is verified, the continuation is
    /// incomplete and no unexpired claim exists.
    async fn try_claim_continuation(
        &self,
        tenant_id: &str,
        lease: Duration,
    ) -> Result<bool, DatabaseError>;

    async fn release_continuation(&self, tenant_id: &str) -> Result<(), DatabaseError>;

    /// Profiles whose brand is verified but whose continuation is incomplete.
    async fn list_stalled_continuations(&self) -> Result<Vec<RegistrationProfile>, DatabaseError>;

    // ── Webhook log ─────────────────────────────────────────────────

    /// Append a raw webhook body to the audit log. Returns the entry id.
    async fn append_webhook_event(&self, source: &str, body: &str)
    -> Result<Uuid, DatabaseError>;

    /// Most recent log entries first.
    async fn list_webhook_events(&self, limit: usize)
    -> Result<Vec<WebhookLogEntry>, DatabaseError>;

    // ── Automations ─────────────────────────────────────────────────

    async fn get_automation(
        &self,
        tenant_id: &str,
    ) -> Result<Option<AutomationWorkflow>, DatabaseError>;

    /// Insert or replace the tenant's automation reference.
    async fn save_automation(&self, workflow: &AutomationWorkflow) -> Result<(), DatabaseError>;

    async fn delete_automation(&self, tenant_id: &str) -> Result<bool, DatabaseError>;
}
