//! libSQL backend — async `RegistrationStore` implementation.
//!
//! Every profile write is a single conditional UPDATE, so concurrent writers
//! on one connection can interleave statements without losing fields.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::automation::model::{AutomationWorkflow, WorkflowState};
use crate::error::DatabaseError;
use crate::registration::model::{
    BrandStatusError, BusinessInfo, ExternalIdKind, ProfilePatch, RegistrationProfile,
};
use crate::store::migrations;
use crate::store::traits::{RegistrationStore, WebhookLogEntry};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations. Writes
/// take `write_lock` so no statement lands inside another writer's
/// transaction on the shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_errors(&self, tenant_id: &str) -> Result<Vec<BrandStatusError>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT code, description, field FROM brand_status_errors
                 WHERE tenant_id = ?1 ORDER BY id ASC",
                params![tenant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_errors: {e}")))?;

        let mut errors = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_errors: {e}")))?
        {
            errors.push(BrandStatusError {
                code: row.get::<String>(0).ok(),
                description: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("load_errors row parse: {e}")))?,
                field: row.get::<String>(2).ok(),
            });
        }
        Ok(errors)
    }

    /// Run a profile SELECT returning at most one row, with errors attached.
    async fn query_one_profile(
        &self,
        sql: &str,
        value: &str,
        op: &str,
    ) -> Result<Option<RegistrationProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![value])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match row {
            Some(row) => {
                let mut profile = row_to_profile(&row)?;
                profile.brand_status_errors = self.load_errors(&profile.tenant_id).await?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical fixed-width timestamp; lexicographic order matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const PROFILE_COLUMNS: &str = "tenant_id, business_info, subaccount_id, customer_profile_id, \
    customer_profile_status, trust_product_id, brand_registration_id, brand_status, \
    identity_status, messaging_service_id, campaign_id, campaign_status, campaign_payload, \
    created_at, updated_at";

/// Map a libsql Row to a RegistrationProfile (errors are loaded separately).
///
/// Column order matches PROFILE_COLUMNS.
fn row_to_profile(row: &libsql::Row) -> Result<RegistrationProfile, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("profile row parse: {e}"));

    let business_json: String = row.get(1).map_err(parse)?;
    let business_info: BusinessInfo = serde_json::from_str(&business_json)
        .map_err(|e| DatabaseError::Serialization(format!("business_info: {e}")))?;
    let brand_status: String = row.get(7).map_err(parse)?;
    let campaign_payload = row
        .get::<String>(12)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok());
    let created: String = row.get(13).map_err(parse)?;
    let updated: String = row.get(14).map_err(parse)?;

    Ok(RegistrationProfile {
        tenant_id: row.get(0).map_err(parse)?,
        business_info,
        subaccount_id: row.get::<String>(2).ok(),
        customer_profile_id: row.get::<String>(3).ok(),
        customer_profile_status: row.get::<String>(4).ok(),
        trust_product_id: row.get::<String>(5).ok(),
        brand_registration_id: row.get::<String>(6).ok(),
        brand_status: brand_status.parse().unwrap_or_default(),
        identity_status: row.get::<String>(8).ok(),
        brand_status_errors: Vec::new(),
        messaging_service_id: row.get::<String>(9).ok(),
        campaign_id: row.get::<String>(10).ok(),
        campaign_status: row.get::<String>(11).ok(),
        campaign_payload,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_automation(row: &libsql::Row) -> Result<AutomationWorkflow, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("automation row parse: {e}"));
    let state: String = row.get(4).map_err(parse)?;
    let created: String = row.get(5).map_err(parse)?;
    let updated: String = row.get(6).map_err(parse)?;

    Ok(AutomationWorkflow {
        tenant_id: row.get(0).map_err(parse)?,
        workflow_id: row.get(1).map_err(parse)?,
        trigger_id: row.get(2).map_err(parse)?,
        template_id: row
            .get::<String>(3)
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok()),
        state: state.parse().unwrap_or(WorkflowState::Draft),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Set-once identifiers keep the stored value; statuses take the new one,
/// except that a verified brand status is final.
const MERGE_SQL: &str = "UPDATE registration_profiles SET
    subaccount_id = COALESCE(subaccount_id, ?2),
    customer_profile_id = COALESCE(customer_profile_id, ?3),
    customer_profile_status = COALESCE(?4, customer_profile_status),
    trust_product_id = COALESCE(trust_product_id, ?5),
    brand_registration_id = COALESCE(brand_registration_id, ?6),
    brand_status = CASE
        WHEN brand_status = 'verified' THEN brand_status
        WHEN ?7 IS NOT NULL THEN ?7
        WHEN ?8 IS NOT NULL AND brand_status = 'unknown' THEN ?8
        ELSE brand_status END,
    identity_status = COALESCE(?9, identity_status),
    campaign_status = COALESCE(?10, campaign_status),
    campaign_payload = COALESCE(?11, campaign_payload),
    updated_at = ?12
    WHERE tenant_id = ?1";

/// Continuation identifiers only land on a verified brand.
const MERGE_CONTINUATION_SQL: &str = "UPDATE registration_profiles SET
    messaging_service_id = COALESCE(messaging_service_id, ?2),
    campaign_id = COALESCE(campaign_id, ?3),
    updated_at = ?4
    WHERE tenant_id = ?1 AND brand_status = 'verified'";

const AUTOMATION_COLUMNS: &str =
    "tenant_id, workflow_id, trigger_id, template_id, state, created_at, updated_at";

/// Write every part of `patch` inside `tx`.
async fn apply_patch(
    tx: &Transaction,
    tenant_id: &str,
    patch: &ProfilePatch,
) -> Result<(), DatabaseError> {
    let now = ts(Utc::now());
    let payload = patch.campaign_payload.as_ref().map(|v| v.to_string());

    let updated = tx
        .execute(
            MERGE_SQL,
            params![
                tenant_id,
                opt_text(patch.subaccount_id.as_deref()),
                opt_text(patch.customer_profile_id.as_deref()),
                opt_text(patch.customer_profile_status.as_deref()),
                opt_text(patch.trust_product_id.as_deref()),
                opt_text(patch.brand_registration_id.as_deref()),
                opt_text(patch.brand_status.map(|s| s.as_str())),
                opt_text(patch.initial_brand_status.map(|s| s.as_str())),
                opt_text(patch.identity_status.as_deref()),
                opt_text(patch.campaign_status.as_deref()),
                opt_text(payload.as_deref()),
                now.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("merge_profile: {e}")))?;

    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity: "registration_profile".into(),
            id: tenant_id.to_string(),
        });
    }

    for error in &patch.brand_status_errors {
        tx.execute(
            "INSERT OR IGNORE INTO brand_status_errors
                (tenant_id, fingerprint, code, description, field, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tenant_id,
                error.fingerprint(),
                opt_text(error.code.as_deref()),
                error.description.clone(),
                opt_text(error.field.as_deref()),
                now.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append brand error: {e}")))?;
    }

    if patch.touches_continuation() {
        let guarded = tx
            .execute(
                MERGE_CONTINUATION_SQL,
                params![
                    tenant_id,
                    opt_text(patch.messaging_service_id.as_deref()),
                    opt_text(patch.campaign_id.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_profile continuation: {e}")))?;
        if guarded == 0 {
            return Err(DatabaseError::Constraint(format!(
                "continuation identifiers for tenant {tenant_id} require a verified brand"
            )));
        }
    }
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RegistrationStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn create_profile(
        &self,
        tenant_id: &str,
        business_info: &BusinessInfo,
    ) -> Result<(RegistrationProfile, bool), DatabaseError> {
        let business_json = serde_json::to_string(business_info)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = ts(Utc::now());

        let _guard = self.write_lock.lock().await;
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO registration_profiles
                    (tenant_id, business_info, brand_status, created_at, updated_at)
                 VALUES (?1, ?2, 'unknown', ?3, ?3)",
                params![tenant_id, business_json, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_profile: {e}")))?;

        let profile = self
            .get_profile(tenant_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "registration_profile".into(),
                id: tenant_id.to_string(),
            })?;

        if inserted > 0 {
            info!(tenant_id, "Registration profile created");
        }
        Ok((profile, inserted > 0))
    }

    async fn get_profile(
        &self,
        tenant_id: &str,
    ) -> Result<Option<RegistrationProfile>, DatabaseError> {
        self.query_one_profile(
            &format!("SELECT {PROFILE_COLUMNS} FROM registration_profiles WHERE tenant_id = ?1"),
            tenant_id,
            "get_profile",
        )
        .await
    }

    async fn merge_profile(
        &self,
        tenant_id: &str,
        patch: &ProfilePatch,
    ) -> Result<RegistrationProfile, DatabaseError> {
        {
            let _guard = self.write_lock.lock().await;
            let tx = self
                .conn()
                .transaction()
                .await
                .map_err(|e| DatabaseError::Query(format!("merge_profile begin: {e}")))?;
            match apply_patch(&tx, tenant_id, patch).await {
                Ok(()) => tx
                    .commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("merge_profile commit: {e}")))?,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(tenant_id, error = %rollback, "merge_profile rollback failed");
                    }
                    return Err(e);
                }
            }
        }

        debug!(tenant_id, "Registration profile merged");
        self.get_profile(tenant_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "registration_profile".into(),
                id: tenant_id.to_string(),
            })
    }

    async fn find_by_external_id(
        &self,
        kind: ExternalIdKind,
        external_id: &str,
    ) -> Result<Option<RegistrationProfile>, DatabaseError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM registration_profiles WHERE {} = ?1 LIMIT 1",
            kind.column()
        );
        self.query_one_profile(&sql, external_id, "find_by_external_id")
            .await
    }

    async fn try_claim_continuation(
        &self,
        tenant_id: &str,
        lease: Duration,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| DatabaseError::Constraint(format!("invalid lease: {e}")))?;
        let expired_before = ts(now - lease);

        let _guard = self.write_lock.lock().await;
        let claimed = self
            .conn()
            .execute(
                "UPDATE registration_profiles SET continuation_claimed_at = ?2
                 WHERE tenant_id = ?1
                   AND brand_status = 'verified'
                   AND (messaging_service_id IS NULL OR campaign_id IS NULL)
                   AND (continuation_claimed_at IS NULL OR continuation_claimed_at < ?3)",
                params![tenant_id, ts(now), expired_before],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("try_claim_continuation: {e}")))?;

        debug!(tenant_id, claimed = claimed > 0, "Continuation claim attempted");
        Ok(claimed > 0)
    }

    async fn release_continuation(&self, tenant_id: &str) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "UPDATE registration_profiles SET continuation_claimed_at = NULL WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_continuation: {e}")))?;
        Ok(())
    }

    async fn list_stalled_continuations(
        &self,
    ) -> Result<Vec<RegistrationProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM registration_profiles
                     WHERE brand_status = 'verified'
                       AND (messaging_service_id IS NULL OR campaign_id IS NULL)
                     ORDER BY updated_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_stalled_continuations: {e}")))?;

        let mut profiles = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_profile(&row) {
                Ok(profile) => profiles.push(profile),
                Err(e) => tracing::warn!("Skipping profile row: {e}"),
            }
        }
        for profile in &mut profiles {
            profile.brand_status_errors = self.load_errors(&profile.tenant_id).await?;
        }
        Ok(profiles)
    }

    // ── Webhook log ─────────────────────────────────────────────────

    async fn append_webhook_event(&self, source: &str, body: &str) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO webhook_events (id, source, body, received_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), source, body, ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_webhook_event: {e}")))?;
        debug!(id = %id, source, "Webhook event logged");
        Ok(id)
    }

    async fn list_webhook_events(
        &self,
        limit: usize,
    ) -> Result<Vec<WebhookLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, source, body, received_at FROM webhook_events
                 ORDER BY received_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_webhook_events: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).unwrap_or_default();
            let received: String = row.get(3).unwrap_or_default();
            entries.push(WebhookLogEntry {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                source: row.get(1).unwrap_or_default(),
                body: row.get(2).unwrap_or_default(),
                received_at: parse_datetime(&received),
            });
        }
        Ok(entries)
    }

    // ── Automations ─────────────────────────────────────────────────

    async fn get_automation(
        &self,
        tenant_id: &str,
    ) -> Result<Option<AutomationWorkflow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUTOMATION_COLUMNS} FROM automation_workflows WHERE tenant_id = ?1"
                ),
                params![tenant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_automation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_automation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_automation: {e}"))),
        }
    }

    async fn save_automation(&self, workflow: &AutomationWorkflow) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO automation_workflows
                    (tenant_id, workflow_id, trigger_id, template_id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (tenant_id) DO UPDATE SET
                    workflow_id = excluded.workflow_id,
                    trigger_id = excluded.trigger_id,
                    template_id = excluded.template_id,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
                params![
                    workflow.tenant_id.clone(),
                    workflow.workflow_id.clone(),
                    workflow.trigger_id.clone(),
                    opt_text(workflow.template_id.map(|id| id.to_string()).as_deref()),
                    workflow.state.to_string(),
                    ts(workflow.created_at),
                    ts(Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_automation: {e}")))?;
        debug!(tenant_id = %workflow.tenant_id, state = %workflow.state, "Automation saved");
        Ok(())
    }

    async fn delete_automation(&self, tenant_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "DELETE FROM automation_workflows WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_automation: {e}")))?;
        Ok(count > 0)
    }
}
