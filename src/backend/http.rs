//! REST client for the registration backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{
    BrandRegistration, BundleRequest, CampaignRequest, EndUserRequest, Evaluation,
    RegistrationBackend,
};
use crate::error::BackendError;
use crate::registration::model::PostalAddress;

/// Registration backend reached over HTTP with form-encoded requests and
/// JSON responses, authenticated with the parent account's credentials.
pub struct HttpRegistrationBackend {
    base_url: String,
    account_sid: String,
    auth_token: SecretString,
    client: reqwest::Client,
}

impl HttpRegistrationBackend {
    pub fn new(
        base_url: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: SecretString,
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
            account_sid: account_sid.into(),
            auth_token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn scoped(&self, account: &str, path: &str) -> String {
        self.url(&format!("Accounts/{account}/{}", path.trim_start_matches('/')))
    }

    /// POST a form and return the decoded JSON body.
    async fn post_form(
        &self,
        operation: &str,
        url: String,
        form: &[(&str, String)],
    ) -> Result<Value, BackendError> {
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(form)
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

        let body = resp
            .json::<Value>()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                operation: operation.into(),
                reason: e.to_string(),
            })?;
        tracing::debug!(operation, "Registration backend call succeeded");
        Ok(body)
    }
}

/// Pull a string field out of a backend response.
fn field(operation: &str, body: &Value, key: &str) -> Result<String, BackendError> {
    body.get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| BackendError::InvalidResponse {
            operation: operation.into(),
            reason: format!("missing `{key}` in response"),
        })
}

fn bundle_form(request: &BundleRequest) -> Vec<(&'static str, String)> {
    vec![
        ("FriendlyName", request.friendly_name.clone()),
        ("Email", request.email.clone()),
        ("PolicySid", request.policy_sid.clone()),
    ]
}

#[async_trait]
impl RegistrationBackend for HttpRegistrationBackend {
    async fn create_subaccount(&self, friendly_name: &str) -> Result<String, BackendError> {
        let op = "create_subaccount";
        let body = self
            .post_form(op, self.url("Accounts"), &[("FriendlyName", friendly_name.to_string())])
            .await?;
        field(op, &body, "sid")
    }

    async fn create_customer_profile(
        &self,
        account: &str,
        request: &BundleRequest,
    ) -> Result<String, BackendError> {
        let op = "create_customer_profile";
        let body = self
            .post_form(op, self.scoped(account, "CustomerProfiles"), &bundle_form(request))
            .await?;
        field(op, &body, "sid")
    }

    async fn create_end_user(
        &self,
        account: &str,
        request: &EndUserRequest,
    ) -> Result<String, BackendError> {
        let op = "create_end_user";
        let form = [
            ("FriendlyName", request.friendly_name.clone()),
            ("Type", request.kind.as_str().to_string()),
            ("Attributes", request.attributes.to_string()),
        ];
        let body = self.post_form(op, self.scoped(account, "EndUsers"), &form).await?;
        field(op, &body, "sid")
    }

    async fn create_address(
        &self,
        account: &str,
        customer_name: &str,
        address: &PostalAddress,
    ) -> Result<String, BackendError> {
        let op = "create_address";
        let mut form = vec![
            ("CustomerName", customer_name.to_string()),
            ("Street", address.street.clone()),
            ("City", address.city.clone()),
            ("Region", address.region.clone()),
            ("PostalCode", address.postal_code.clone()),
            ("IsoCountry", address.country.clone()),
        ];
        if let Some(ref secondary) = address.street_secondary {
            form.push(("StreetSecondary", secondary.clone()));
        }
        let body = self.post_form(op, self.scoped(account, "Addresses"), &form).await?;
        field(op, &body, "sid")
    }

    async fn create_supporting_document(
        &self,
        account: &str,
        friendly_name: &str,
        document_type: &str,
        attributes: &Value,
    ) -> Result<String, BackendError> {
        let op = "create_supporting_document";
        let form = [
            ("FriendlyName", friendly_name.to_string()),
            ("Type", document_type.to_string()),
            ("Attributes", attributes.to_string()),
        ];
        let body = self
            .post_form(op, self.scoped(account, "SupportingDocuments"), &form)
            .await?;
        field(op, &body, "sid")
    }

    async fn attach_to_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
        object_id: &str,
    ) -> Result<(), BackendError> {
        let path = format!("CustomerProfiles/{customer_profile_id}/EntityAssignments");
        self.post_form(
            "attach_to_customer_profile",
            self.scoped(account, &path),
            &[("ObjectSid", object_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn evaluate_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
    ) -> Result<Evaluation, BackendError> {
        let op = "evaluate_customer_profile";
        let path = format!("CustomerProfiles/{customer_profile_id}/Evaluations");
        let body = self
            .post_form(op, self.scoped(account, &path), &[("PolicySid", String::new())])
            .await?;
        serde_json::from_value(body).map_err(|e| BackendError::InvalidResponse {
            operation: op.into(),
            reason: e.to_string(),
        })
    }

    async fn submit_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
    ) -> Result<String, BackendError> {
        let op = "submit_customer_profile";
        let path = format!("CustomerProfiles/{customer_profile_id}");
        let body = self
            .post_form(op, self.scoped(account, &path), &[("Status", "pending-review".into())])
            .await?;
        field(op, &body, "status")
    }

    async fn create_trust_product(
        &self,
        account: &str,
        request: &BundleRequest,
    ) -> Result<String, BackendError> {
        let op = "create_trust_product";
        let body = self
            .post_form(op, self.scoped(account, "TrustProducts"), &bundle_form(request))
            .await?;
        field(op, &body, "sid")
    }

    async fn attach_to_trust_product(
        &self,
        account: &str,
        trust_product_id: &str,
        object_id: &str,
    ) -> Result<(), BackendError> {
        let path = format!("TrustProducts/{trust_product_id}/EntityAssignments");
        self.post_form(
            "attach_to_trust_product",
            self.scoped(account, &path),
            &[("ObjectSid", object_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn evaluate_trust_product(
        &self,
        account: &str,
        trust_product_id: &str,
    ) -> Result<Evaluation, BackendError> {
        let op = "evaluate_trust_product";
        let path = format!("TrustProducts/{trust_product_id}/Evaluations");
        let body = self
            .post_form(op, self.scoped(account, &path), &[("PolicySid", String::new())])
            .await?;
        serde_json::from_value(body).map_err(|e| BackendError::InvalidResponse {
            operation: op.into(),
            reason: e.to_string(),
        })
    }

    async fn submit_trust_product(
        &self,
        account: &str,
        trust_product_id: &str,
    ) -> Result<String, BackendError> {
        let op = "submit_trust_product";
        let path = format!("TrustProducts/{trust_product_id}");
        let body = self
            .post_form(op, self.scoped(account, &path), &[("Status", "pending-review".into())])
            .await?;
        field(op, &body, "status")
    }

    async fn create_brand_registration(
        &self,
        account: &str,
        customer_profile_id: &str,
        trust_product_id: &str,
    ) -> Result<BrandRegistration, BackendError> {
        let op = "create_brand_registration";
        let form = [
            ("CustomerProfileBundleSid", customer_profile_id.to_string()),
            ("A2PProfileBundleSid", trust_product_id.to_string()),
        ];
        let body = self
            .post_form(op, self.scoped(account, "BrandRegistrations"), &form)
            .await?;
        Ok(BrandRegistration {
            sid: field(op, &body, "sid")?,
            status: field(op, &body, "status").unwrap_or_else(|_| "PENDING".to_string()),
        })
    }

    async fn create_messaging_service(
        &self,
        account: &str,
        friendly_name: &str,
    ) -> Result<String, BackendError> {
        let op = "create_messaging_service";
        let body = self
            .post_form(
                op,
                self.scoped(account, "Services"),
                &[("FriendlyName", friendly_name.to_string())],
            )
            .await?;
        field(op, &body, "sid")
    }

    async fn create_campaign(
        &self,
        account: &str,
        messaging_service_id: &str,
        request: &CampaignRequest,
    ) -> Result<String, BackendError> {
        let op = "create_campaign";
        let path = format!("Services/{messaging_service_id}/Compliance/Usa2p");
        let mut form = vec![
            ("BrandRegistrationSid", request.brand_registration_id.clone()),
            ("UsAppToPersonUsecase", request.use_case.clone()),
            ("Description", request.description.clone()),
            ("MessageFlow", request.message_flow.clone()),
            ("HasEmbeddedLinks", request.has_embedded_links.to_string()),
            ("HasEmbeddedPhone", request.has_embedded_phone.to_string()),
        ];
        for sample in &request.message_samples {
            form.push(("MessageSamples", sample.clone()));
        }
        let body = self.post_form(op, self.scoped(account, &path), &form).await?;
        field(op, &body, "sid")
    }
}
