//! Automation bootstrapper — keeps one auto-reply workflow per tenant.
//!
//! Lifecycle: absent, draft (workflow and trigger exist), configured (webhook
//! action wired and published), then back to absent on teardown. The
//! platform has no idempotency key, so a name lookup precedes every create.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::client::AutomationBackend;
use super::model::{
    AutomationWorkflow, CUSTOMER_REPLIED_TRIGGER, WorkflowDocument, WorkflowState, WorkflowSummary,
};
use crate::backend::bounded;
use crate::error::AutomationError;
use crate::store::RegistrationStore;

/// Existence check result, as returned by `GET /automation`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    pub is_exists: bool,
    pub count: usize,
    pub rows: Vec<WorkflowSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAutomation {
    pub workflow_id: String,
    pub trigger_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub workflow_id: String,
    pub trigger_id: String,
    /// Correlation id for the webhook action; generated when absent.
    #[serde(default)]
    pub template_id: Option<Uuid>,
}

/// What `sync_targets` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncOutcome {
    Created { workflow_id: String },
    Configured { workflow_id: String },
    Deleted { workflow_id: String },
    Unchanged,
}

pub struct AutomationBootstrapper {
    store: Arc<dyn RegistrationStore>,
    backend: Arc<dyn AutomationBackend>,
    name_prefix: String,
    public_base_url: String,
    call_timeout: Duration,
}

impl AutomationBootstrapper {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        backend: Arc<dyn AutomationBackend>,
        name_prefix: impl Into<String>,
        public_base_url: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            name_prefix: name_prefix.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            call_timeout,
        }
    }

    pub fn workflow_name(&self, tenant_id: &str) -> String {
        format!("{} {}", self.name_prefix, tenant_id)
    }

    fn callback_url(&self, template_id: Uuid) -> String {
        format!("{}/webhooks/automation/{template_id}", self.public_base_url)
    }

    async fn lookup(&self, tenant_id: &str) -> Result<Vec<WorkflowSummary>, AutomationError> {
        let name = self.workflow_name(tenant_id);
        Ok(bounded(
            "find_workflow_by_name",
            self.call_timeout,
            self.backend.find_by_name(&name),
        )
        .await?)
    }

    /// The workflow must be one this tenant's name lookup returns.
    async fn ensure_owned(&self, tenant_id: &str, workflow_id: &str) -> Result<(), AutomationError> {
        let rows = self.lookup(tenant_id).await?;
        if rows.iter().any(|row| row.id == workflow_id) {
            Ok(())
        } else {
            Err(AutomationError::ForeignWorkflow {
                workflow_id: workflow_id.to_string(),
                tenant_id: tenant_id.to_string(),
            })
        }
    }

    pub async fn status(&self, tenant_id: &str) -> Result<AutomationStatus, AutomationError> {
        let rows = self.lookup(tenant_id).await?;
        Ok(AutomationStatus {
            is_exists: !rows.is_empty(),
            count: rows.len(),
            rows,
        })
    }

    /// absent → draft. Returns the existing ids when the workflow already exists.
    pub async fn create(&self, tenant_id: &str) -> Result<CreatedAutomation, AutomationError> {
        let rows = self.lookup(tenant_id).await?;
        let stored = self.store.get_automation(tenant_id).await?;

        if let Some(existing) = rows.first() {
            if let Some(stored) = stored.filter(|s| s.workflow_id == existing.id) {
                debug!(tenant_id, workflow_id = %stored.workflow_id, "Automation already exists");
                return Ok(CreatedAutomation {
                    workflow_id: stored.workflow_id,
                    trigger_id: stored.trigger_id,
                });
            }
            // Exists upstream without a local reference; adopt it.
            info!(tenant_id, workflow_id = %existing.id, "Adopting existing automation");
            let trigger_id = self.add_trigger(&existing.id).await?;
            return self.save_draft(tenant_id, &existing.id, trigger_id).await;
        }

        let name = self.workflow_name(tenant_id);
        let workflow = bounded(
            "create_workflow",
            self.call_timeout,
            self.backend.create_workflow(&name),
        )
        .await?;
        let trigger_id = self.add_trigger(&workflow.id).await?;
        info!(tenant_id, workflow_id = %workflow.id, "Draft automation created");
        self.save_draft(tenant_id, &workflow.id, trigger_id).await
    }

    async fn add_trigger(&self, workflow_id: &str) -> Result<String, AutomationError> {
        Ok(bounded(
            "create_trigger",
            self.call_timeout,
            self.backend
                .create_trigger(workflow_id, CUSTOMER_REPLIED_TRIGGER),
        )
        .await?)
    }

    async fn save_draft(
        &self,
        tenant_id: &str,
        workflow_id: &str,
        trigger_id: String,
    ) -> Result<CreatedAutomation, AutomationError> {
        let workflow = AutomationWorkflow::draft(tenant_id, workflow_id, trigger_id.clone());
        self.store.save_automation(&workflow).await?;
        Ok(CreatedAutomation {
            workflow_id: workflow_id.to_string(),
            trigger_id,
        })
    }

    /// draft → configured, in one full-document update.
    pub async fn configure(
        &self,
        tenant_id: &str,
        request: &ConfigureRequest,
    ) -> Result<AutomationWorkflow, AutomationError> {
        self.ensure_owned(tenant_id, &request.workflow_id).await?;

        let template_id = request.template_id.unwrap_or_else(Uuid::new_v4);
        let document = WorkflowDocument::published_with_webhook(
            &request.workflow_id,
            &self.workflow_name(tenant_id),
            &request.trigger_id,
            template_id,
            &self.callback_url(template_id),
        );
        bounded(
            "update_workflow",
            self.call_timeout,
            self.backend.update_workflow(&document),
        )
        .await?;

        let created_at = self
            .store
            .get_automation(tenant_id)
            .await?
            .filter(|w| w.workflow_id == request.workflow_id)
            .map(|w| w.created_at)
            .unwrap_or_else(Utc::now);
        let workflow = AutomationWorkflow {
            tenant_id: tenant_id.to_string(),
            workflow_id: request.workflow_id.clone(),
            trigger_id: request.trigger_id.clone(),
            template_id: Some(template_id),
            state: WorkflowState::Configured,
            created_at,
            updated_at: Utc::now(),
        };
        self.store.save_automation(&workflow).await?;
        info!(tenant_id, workflow_id = %workflow.workflow_id, template_id = %template_id, "Automation configured");
        Ok(workflow)
    }

    /// any → absent.
    pub async fn delete(&self, tenant_id: &str, workflow_id: &str) -> Result<(), AutomationError> {
        let rows = self.lookup(tenant_id).await?;
        if rows.iter().any(|row| row.id == workflow_id) {
            bounded(
                "delete_workflow",
                self.call_timeout,
                self.backend.delete_workflow(workflow_id),
            )
            .await?;
        } else {
            let stored = self.store.get_automation(tenant_id).await?;
            if stored.is_none_or(|s| s.workflow_id != workflow_id) {
                return Err(AutomationError::ForeignWorkflow {
                    workflow_id: workflow_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                });
            }
            debug!(tenant_id, workflow_id, "Workflow already gone upstream");
        }
        self.store.delete_automation(tenant_id).await?;
        info!(tenant_id, workflow_id, "Automation deleted");
        Ok(())
    }

    /// Reconcile the automation with the tenant's selected targets: no targets
    /// tears it down, any target makes sure it exists and is configured.
    pub async fn sync_targets(
        &self,
        tenant_id: &str,
        targets: &[String],
    ) -> Result<SyncOutcome, AutomationError> {
        let stored = self.store.get_automation(tenant_id).await?;

        if targets.is_empty() {
            let workflow_id = match stored {
                Some(workflow) => Some(workflow.workflow_id),
                None => self.lookup(tenant_id).await?.into_iter().next().map(|r| r.id),
            };
            return match workflow_id {
                Some(workflow_id) => {
                    self.delete(tenant_id, &workflow_id).await?;
                    Ok(SyncOutcome::Deleted { workflow_id })
                }
                None => Ok(SyncOutcome::Unchanged),
            };
        }

        match stored {
            Some(workflow) if workflow.state == WorkflowState::Configured => {
                Ok(SyncOutcome::Unchanged)
            }
            Some(workflow) => {
                let configured = self
                    .configure(
                        tenant_id,
                        &ConfigureRequest {
                            workflow_id: workflow.workflow_id,
                            trigger_id: workflow.trigger_id,
                            template_id: None,
                        },
                    )
                    .await?;
                Ok(SyncOutcome::Configured {
                    workflow_id: configured.workflow_id,
                })
            }
            None => {
                let created = self.create(tenant_id).await?;
                self.configure(
                    tenant_id,
                    &ConfigureRequest {
                        workflow_id: created.workflow_id.clone(),
                        trigger_id: created.trigger_id,
                        template_id: None,
                    },
                )
                .await?;
                Ok(SyncOutcome::Created {
                    workflow_id: created.workflow_id,
                })
            }
        }
    }
}
