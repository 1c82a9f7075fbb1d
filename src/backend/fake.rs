//! Recording in-memory registration backend for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    BrandRegistration, BundleRequest, CampaignRequest, EndUserRequest, Evaluation,
    RegistrationBackend,
};
use crate::error::BackendError;
use crate::registration::model::PostalAddress;

#[derive(Default)]
pub struct FakeRegistrationBackend {
    calls: Mutex<HashMap<String, usize>>,
    fail_on: Mutex<Option<String>>,
    slow_on: Mutex<Option<(String, Duration)>>,
    noncompliant: Mutex<bool>,
}

impl FakeRegistrationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `operation` fail with a 500.
    pub fn fail_on(&self, operation: &str) {
        *self.fail_on.lock().unwrap() = Some(operation.to_string());
    }

    pub fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    /// Delay every call to `operation` by `delay`.
    pub fn slow_on(&self, operation: &str, delay: Duration) {
        *self.slow_on.lock().unwrap() = Some((operation.to_string(), delay));
    }

    /// Evaluations report `noncompliant`.
    pub fn set_noncompliant(&self, value: bool) {
        *self.noncompliant.lock().unwrap() = value;
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Record a call; returns its 1-based sequence number for that operation.
    async fn record(&self, operation: &str) -> Result<usize, BackendError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(operation.to_string()).or_default();
            *n += 1;
            *n
        };
        let delay = self
            .slow_on
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(op, _)| op == operation)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.lock().unwrap().as_deref() == Some(operation) {
            return Err(BackendError::Status {
                operation: operation.to_string(),
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(n)
    }

    fn evaluation(&self, n: usize) -> Evaluation {
        let status = if *self.noncompliant.lock().unwrap() {
            "noncompliant"
        } else {
            "compliant"
        };
        Evaluation {
            sid: format!("EL{n:04}"),
            status: status.to_string(),
        }
    }
}

#[async_trait]
impl RegistrationBackend for FakeRegistrationBackend {
    async fn create_subaccount(&self, _friendly_name: &str) -> Result<String, BackendError> {
        let n = self.record("create_subaccount").await?;
        Ok(format!("AC{n:04}"))
    }

    async fn create_customer_profile(
        &self,
        _account: &str,
        _request: &BundleRequest,
    ) -> Result<String, BackendError> {
        let n = self.record("create_customer_profile").await?;
        Ok(format!("BUcp{n:04}"))
    }

    async fn create_end_user(
        &self,
        _account: &str,
        _request: &EndUserRequest,
    ) -> Result<String, BackendError> {
        let n = self.record("create_end_user").await?;
        Ok(format!("IT{n:04}"))
    }

    async fn create_address(
        &self,
        _account: &str,
        _customer_name: &str,
        _address: &PostalAddress,
    ) -> Result<String, BackendError> {
        let n = self.record("create_address").await?;
        Ok(format!("AD{n:04}"))
    }

    async fn create_supporting_document(
        &self,
        _account: &str,
        _friendly_name: &str,
        _document_type: &str,
        _attributes: &serde_json::Value,
    ) -> Result<String, BackendError> {
        let n = self.record("create_supporting_document").await?;
        Ok(format!("RD{n:04}"))
    }

    async fn attach_to_customer_profile(
        &self,
        _account: &str,
        _customer_profile_id: &str,
        _object_id: &str,
    ) -> Result<(), BackendError> {
        self.record("attach_to_customer_profile").await?;
        Ok(())
    }

    async fn evaluate_customer_profile(
        &self,
        _account: &str,
        _customer_profile_id: &str,
    ) -> Result<Evaluation, BackendError> {
        let n = self.record("evaluate_customer_profile").await?;
        Ok(self.evaluation(n))
    }

    async fn submit_customer_profile(
        &self,
        _account: &str,
        _customer_profile_id: &str,
    ) -> Result<String, BackendError> {
        self.record("submit_customer_profile").await?;
        Ok("pending-review".to_string())
    }

    async fn create_trust_product(
        &self,
        _account: &str,
        _request: &BundleRequest,
    ) -> Result<String, BackendError> {
        let n = self.record("create_trust_product").await?;
        Ok(format!("BUtp{n:04}"))
    }

    async fn attach_to_trust_product(
        &self,
        _account: &str,
        _trust_product_id: &str,
        _object_id: &str,
    ) -> Result<(), BackendError> {
        self.record("attach_to_trust_product").await?;
        Ok(())
    }

    async fn evaluate_trust_product(
        &self,
        _account: &str,
        _trust_product_id: &str,
    ) -> Result<Evaluation, BackendError> {
        let n = self.record("evaluate_trust_product").await?;
        Ok(self.evaluation(n))
    }

    async fn submit_trust_product(
        &self,
        _account: &str,
        _trust_product_id: &str,
    ) -> Result<String, BackendError> {
        self.record("submit_trust_product").await?;
        Ok("pending-review".to_string())
    }

    async fn create_brand_registration(
        &self,
        _account: &str,
        _customer_profile_id: &str,
        _trust_product_id: &str,
    ) -> Result<BrandRegistration, BackendError> {
        let n = self.record("create_brand_registration").await?;
        Ok(BrandRegistration {
            sid: format!("BN{n:04}"),
            status: "PENDING".to_string(),
        })
    }

    async fn create_messaging_service(
        &self,
        _account: &str,
        _friendly_name: &str,
    ) -> Result<String, BackendError> {
        let n = self.record("create_messaging_service").await?;
        Ok(format!("MG{n:04}"))
    }

    async fn create_campaign(
        &self,
        _account: &str,
        _messaging_service_id: &str,
        _request: &CampaignRequest,
    ) -> Result<String, BackendError> {
        let n = self.record("create_campaign").await?;
        Ok(format!("QE{n:04}"))
    }
}
