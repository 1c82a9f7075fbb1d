//! Auto-reply automation models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local lifecycle state of a tenant's automation.
///
/// Absence of a stored workflow is the `absent` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Exists upstream with no trigger action or template wired.
    Draft,
    /// Webhook action attached and published.
    Configured,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Configured => write!(f, "configured"),
        }
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "configured" => Ok(Self::Configured),
            other => Err(format!("unknown workflow state: {other}")),
        }
    }
}

/// Stored reference to a tenant's auto-reply automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationWorkflow {
    pub tenant_id: String,
    pub workflow_id: String,
    pub trigger_id: String,
    /// Correlation id of the webhook action, generated locally.
    pub template_id: Option<Uuid>,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationWorkflow {
    pub fn draft(
        tenant_id: impl Into<String>,
        workflow_id: impl Into<String>,
        trigger_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            workflow_id: workflow_id.into(),
            trigger_id: trigger_id.into(),
            template_id: None,
            state: WorkflowState::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Summary row returned by the automation platform's name lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// Trigger event the auto-reply automation listens for.
pub const CUSTOMER_REPLIED_TRIGGER: &str = "customer_replied";

/// A single action step in a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub name: String,
    pub attributes: serde_json::Value,
}

/// A trigger wired to the actions it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTrigger {
    pub id: String,
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Id of the first action the trigger invokes.
    pub target_action_id: Option<String>,
}

/// Complete workflow document sent on update; the platform replaces the
/// whole resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    /// `draft` or `published`.
    pub status: String,
    pub triggers: Vec<WorkflowTrigger>,
    pub actions: Vec<WorkflowAction>,
}

impl WorkflowDocument {
    /// Published document with the trigger invoking a webhook callback action.
    pub fn published_with_webhook(
        workflow_id: &str,
        name: &str,
        trigger_id: &str,
        template_id: Uuid,
        callback_url: &str,
    ) -> Self {
        let action_id = template_id.to_string();
        Self {
            id: workflow_id.to_string(),
            name: name.to_string(),
            status: "published".to_string(),
            triggers: vec![WorkflowTrigger {
                id: trigger_id.to_string(),
                trigger_type: CUSTOMER_REPLIED_TRIGGER.to_string(),
                target_action_id: Some(action_id.clone()),
            }],
            actions: vec![WorkflowAction {
                id: action_id,
                action_type: "webhook".to_string(),
                name: "Auto reply webhook".to_string(),
                attributes: serde_json::json!({
                    "method": "POST",
                    "url": callback_url,
                    "customData": [
                        { "key": "templateId", "value": template_id.to_string() }
                    ],
                }),
            }],
        }
    }
}
