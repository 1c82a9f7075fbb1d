//! Automation platform client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use super::model::{WorkflowDocument, WorkflowSummary};
use crate::error::BackendError;

/// Operations on the automation platform's workflow resource.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Workflows whose name matches exactly.
    async fn find_by_name(&self, name: &str) -> Result<Vec<WorkflowSummary>, BackendError>;

    /// Create an empty draft workflow.
    async fn create_workflow(&self, name: &str) -> Result<WorkflowSummary, BackendError>;

    /// Add a trigger of `trigger_type` to a workflow. Returns the trigger id.
    async fn create_trigger(
        &self,
        workflow_id: &str,
        trigger_type: &str,
    ) -> Result<String, BackendError>;

    /// Replace the whole workflow document.
    async fn update_workflow(&self, document: &WorkflowDocument) -> Result<(), BackendError>;

    /// Delete a workflow. Deleting one that no longer exists succeeds.
    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), BackendError>;
}

/// JSON REST client authenticated with a bearer API key.
pub struct HttpAutomationBackend {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl HttpAutomationBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        connect_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BackendError::Request {
                operation: "client_init".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let resp = request
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| BackendError::Request {
                operation: operation.into(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                operation: operation.into(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn json(&self, operation: &str, resp: reqwest::Response) -> Result<Value, BackendError> {
        resp.json().await.map_err(|e| BackendError::InvalidResponse {
            operation: operation.into(),
            reason: e.to_string(),
        })
    }
}

/// Accept either a bare object or one wrapped under `key`.
fn unwrap_field(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(key) => map.remove(key).unwrap_or(Value::Null),
        other => other,
    }
}

fn summary(operation: &str, value: Value) -> Result<WorkflowSummary, BackendError> {
    serde_json::from_value(value).map_err(|e| BackendError::InvalidResponse {
        operation: operation.into(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl AutomationBackend for HttpAutomationBackend {
    async fn find_by_name(&self, name: &str) -> Result<Vec<WorkflowSummary>, BackendError> {
        const OP: &str = "find_workflow_by_name";
        let req = self
            .client
            .get(self.url("workflows"))
            .query(&[("name", name)]);
        let body = self.json(OP, self.send(OP, req).await?).await?;
        let rows = match unwrap_field(body, "workflows") {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => {
                return Err(BackendError::InvalidResponse {
                    operation: OP.into(),
                    reason: format!("expected a list of workflows, got {other}"),
                });
            }
        };
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let row = summary(OP, row)?;
            // The platform's name filter is a prefix match.
            if row.name == name {
                found.push(row);
            }
        }
        Ok(found)
    }

    async fn create_workflow(&self, name: &str) -> Result<WorkflowSummary, BackendError> {
        const OP: &str = "create_workflow";
        let req = self
            .client
            .post(self.url("workflows"))
            .json(&json!({ "name": name, "status": "draft" }));
        let body = self.json(OP, self.send(OP, req).await?).await?;
        summary(OP, unwrap_field(body, "workflow"))
    }

    async fn create_trigger(
        &self,
        workflow_id: &str,
        trigger_type: &str,
    ) -> Result<String, BackendError> {
        const OP: &str = "create_trigger";
        let req = self
            .client
            .post(self.url(&format!("workflows/{workflow_id}/triggers")))
            .json(&json!({ "type": trigger_type }));
        let body = unwrap_field(self.json(OP, self.send(OP, req).await?).await?, "trigger");
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidResponse {
                operation: OP.into(),
                reason: "missing field 'id'".into(),
            })
    }

    async fn update_workflow(&self, document: &WorkflowDocument) -> Result<(), BackendError> {
        let req = self
            .client
            .put(self.url(&format!("workflows/{}", document.id)))
            .json(document);
        self.send("update_workflow", req).await?;
        Ok(())
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), BackendError> {
        let req = self
            .client
            .delete(self.url(&format!("workflows/{workflow_id}")));
        match self.send("delete_workflow", req).await {
            Ok(_) => Ok(()),
            Err(BackendError::Status { status: 404, .. }) => {
                tracing::debug!(workflow_id, "Workflow already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
