//! Registration backend — the external compliance/messaging API the saga
//! drives.
//!
//! The saga only depends on the [`RegistrationBackend`] trait; [`HttpRegistrationBackend`]
//! is the production implementation over REST.

#[cfg(test)]
pub(crate) mod fake;
pub mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::registration::model::PostalAddress;

pub use http::HttpRegistrationBackend;

/// Await a backend call, failing with [`BackendError::Timeout`] once `limit`
/// elapses. The call is not retried.
pub async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            operation: operation.to_string(),
            timeout: limit,
        }),
    }
}

/// Kinds of end-user records attached to compliance profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndUserKind {
    /// Business information record on the customer profile.
    CustomerProfileBusinessInformation,
    /// Authorized representative on the customer profile.
    AuthorizedRepresentative1,
    /// Messaging profile information on the trust product.
    UsA2pMessagingProfileInformation,
}

impl EndUserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerProfileBusinessInformation => "customer_profile_business_information",
            Self::AuthorizedRepresentative1 => "authorized_representative_1",
            Self::UsA2pMessagingProfileInformation => "us_a2p_messaging_profile_information",
        }
    }
}

/// An end-user record to create.
#[derive(Debug, Clone, PartialEq)]
pub struct EndUserRequest {
    pub kind: EndUserKind,
    pub friendly_name: String,
    pub attributes: serde_json::Value,
}

/// A compliance bundle (customer profile or trust product) to create.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleRequest {
    pub friendly_name: String,
    pub email: String,
    pub policy_sid: String,
}

/// Result of evaluating a bundle against its policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Evaluation {
    pub sid: String,
    /// `compliant` or `noncompliant`.
    pub status: String,
}

impl Evaluation {
    pub fn is_compliant(&self) -> bool {
        self.status.eq_ignore_ascii_case("compliant")
    }
}

/// Response from creating a brand registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrandRegistration {
    pub sid: String,
    pub status: String,
}

/// Compliance campaign to register against a verified brand.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignRequest {
    pub brand_registration_id: String,
    pub use_case: String,
    pub description: String,
    pub message_flow: String,
    pub message_samples: Vec<String>,
    pub has_embedded_links: bool,
    pub has_embedded_phone: bool,
}

/// Operations the onboarding saga performs against the registration backend.
///
/// Every call except [`create_subaccount`](Self::create_subaccount) runs in
/// the context of the tenant's sub-account.
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    /// Create a sub-account for the tenant. Returns its id.
    async fn create_subaccount(&self, friendly_name: &str) -> Result<String, BackendError>;

    /// Create an empty customer (compliance) profile. Returns its id.
    async fn create_customer_profile(
        &self,
        account: &str,
        request: &BundleRequest,
    ) -> Result<String, BackendError>;

    /// Create an end-user record. Returns its id.
    async fn create_end_user(
        &self,
        account: &str,
        request: &EndUserRequest,
    ) -> Result<String, BackendError>;

    /// Create a postal address record. Returns its id.
    async fn create_address(
        &self,
        account: &str,
        customer_name: &str,
        address: &PostalAddress,
    ) -> Result<String, BackendError>;

    /// Create a supporting document (e.g. proof of address). Returns its id.
    async fn create_supporting_document(
        &self,
        account: &str,
        friendly_name: &str,
        document_type: &str,
        attributes: &serde_json::Value,
    ) -> Result<String, BackendError>;

    /// Attach an end-user, document or bundle to a customer profile.
    async fn attach_to_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
        object_id: &str,
    ) -> Result<(), BackendError>;

    async fn evaluate_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
    ) -> Result<Evaluation, BackendError>;

    /// Submit the customer profile for review. Returns the new review status.
    async fn submit_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
    ) -> Result<String, BackendError>;

    /// Create an empty trust product. Returns its id.
    async fn create_trust_product(
        &self,
        account: &str,
        request: &BundleRequest,
    ) -> Result<String, BackendError>;

    /// Attach an end-user or customer profile to a trust product.
    async fn attach_to_trust_product(
        &self,
        account: &str,
        trust_product_id: &str,
        object_id: &str,
    ) -> Result<(), BackendError>;

    async fn evaluate_trust_product(
        &self,
        account: &str,
        trust_product_id: &str,
    ) -> Result<Evaluation, BackendError>;

    /// Submit the trust product for review. Returns the new review status.
    async fn submit_trust_product(
        &self,
        account: &str,
        trust_product_id: &str,
    ) -> Result<String, BackendError>;

    /// Register the messaging brand.
    async fn create_brand_registration(
        &self,
        account: &str,
        customer_profile_id: &str,
        trust_product_id: &str,
    ) -> Result<BrandRegistration, BackendError>;

    /// Create a messaging service. Returns its id.
    async fn create_messaging_service(
        &self,
        account: &str,
        friendly_name: &str,
    ) -> Result<String, BackendError>;

    /// Register a compliance campaign on a messaging service. Returns its id.
    async fn create_campaign(
        &self,
        account: &str,
        messaging_service_id: &str,
        request: &CampaignRequest,
    ) -> Result<String, BackendError>;
}
