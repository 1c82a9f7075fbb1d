//! End-to-end tests for the onboarding HTTP surface.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! database and stub backends, then drives the real REST contract with reqwest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use brand_onboard::api::{AppServices, TENANT_HEADER, app};
use brand_onboard::automation::model::{WorkflowDocument, WorkflowSummary};
use brand_onboard::automation::{AutomationBackend, AutomationBootstrapper};
use brand_onboard::backend::{
    BrandRegistration, BundleRequest, CampaignRequest, EndUserRequest, Evaluation,
    RegistrationBackend,
};
use brand_onboard::config::{CampaignConfig, SagaConfig};
use brand_onboard::error::BackendError;
use brand_onboard::registration::model::PostalAddress;
use brand_onboard::registration::{CompliancePolicies, StepOrchestrator};
use brand_onboard::store::{LibSqlBackend, RegistrationStore};
use brand_onboard::webhooks::WebhookIngestor;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── Stub registration backend ───────────────────────────────────────

#[derive(Default)]
struct StubRegistration {
    calls: Mutex<HashMap<String, usize>>,
    fail_on: Mutex<Option<String>>,
}

impl StubRegistration {
    fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn fail_on(&self, op: Option<&str>) {
        *self.fail_on.lock().unwrap() = op.map(str::to_string);
    }

    fn record(&self, op: &str) -> Result<usize, BackendError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(op.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if self.fail_on.lock().unwrap().as_deref() == Some(op) {
            return Err(BackendError::Status {
                operation: op.to_string(),
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(n)
    }
}

fn compliant() -> Evaluation {
    Evaluation {
        sid: "EL1".into(),
        status: "compliant".into(),
    }
}

#[async_trait]
impl RegistrationBackend for StubRegistration {
    async fn create_subaccount(&self, _name: &str) -> Result<String, BackendError> {
        Ok(format!("AC_{}", self.record("create_subaccount")?))
    }
    async fn create_customer_profile(
        &self,
        _account: &str,
        _request: &BundleRequest,
    ) -> Result<String, BackendError> {
        Ok(format!("BU_cp_{}", self.record("create_customer_profile")?))
    }
    async fn create_end_user(
        &self,
        _account: &str,
        _request: &EndUserRequest,
    ) -> Result<String, BackendError> {
        Ok(format!("IT_{}", self.record("create_end_user")?))
    }
    async fn create_address(
        &self,
        _account: &str,
        _customer_name: &str,
        _address: &PostalAddress,
    ) -> Result<String, BackendError> {
        Ok(format!("AD_{}", self.record("create_address")?))
    }
    async fn create_supporting_document(
        &self,
        _account: &str,
        _friendly_name: &str,
        _document_type: &str,
        _attributes: &Value,
    ) -> Result<String, BackendError> {
        Ok(format!("RD_{}", self.record("create_supporting_document")?))
    }
    async fn attach_to_customer_profile(
        &self,
        _account: &str,
        _customer_profile_id: &str,
        _object_id: &str,
    ) -> Result<(), BackendError> {
        self.record("attach_to_customer_profile").map(|_| ())
    }
    async fn evaluate_customer_profile(
        &self,
        _account: &str,
        _customer_profile_id: &str,
    ) -> Result<Evaluation, BackendError> {
        self.record("evaluate_customer_profile").map(|_| compliant())
    }
    async fn submit_customer_profile(
        &self,
        _account: &str,
        _customer_profile_id: &str,
    ) -> Result<String, BackendError> {
        self.record("submit_customer_profile")
            .map(|_| "pending-review".to_string())
    }
    async fn create_trust_product(
        &self,
        _account: &str,
        _request: &BundleRequest,
    ) -> Result<String, BackendError> {
        Ok(format!("BU_tp_{}", self.record("create_trust_product")?))
    }
    async fn attach_to_trust_product(
        &self,
        _account: &str,
        _trust_product_id: &str,
        _object_id: &str,
    ) -> Result<(), BackendError> {
        self.record("attach_to_trust_product").map(|_| ())
    }
    async fn evaluate_trust_product(
        &self,
        _account: &str,
        _trust_product_id: &str,
    ) -> Result<Evaluation, BackendError> {
        self.record("evaluate_trust_product").map(|_| compliant())
    }
    async fn submit_trust_product(
        &self,
        _account: &str,
        _trust_product_id: &str,
    ) -> Result<String, BackendError> {
        self.record("submit_trust_product")
            .map(|_| "pending-review".to_string())
    }
    async fn create_brand_registration(
        &self,
        _account: &str,
        _customer_profile_id: &str,
        _trust_product_id: &str,
    ) -> Result<BrandRegistration, BackendError> {
        let n = self.record("create_brand_registration")?;
        Ok(BrandRegistration {
            sid: format!("BN_{n}"),
            status: "PENDING".into(),
        })
    }
    async fn create_messaging_service(
        &self,
        _account: &str,
        _friendly_name: &str,
    ) -> Result<String, BackendError> {
        Ok(format!("MG_{}", self.record("create_messaging_service")?))
    }
    async fn create_campaign(
        &self,
        _account: &str,
        _messaging_service_id: &str,
        request: &CampaignRequest,
    ) -> Result<String, BackendError> {
        assert!(request.brand_registration_id.starts_with("BN_"));
        Ok(format!("QE_{}", self.record("create_campaign")?))
    }
}

// ── Stub automation platform ────────────────────────────────────────

#[derive(Default)]
struct StubPlatform {
    workflows: Mutex<Vec<WorkflowSummary>>,
    next: Mutex<usize>,
}

impl StubPlatform {
    fn next_id(&self, prefix: &str) -> String {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        format!("{prefix}_{next}")
    }
}

#[async_trait]
impl AutomationBackend for StubPlatform {
    async fn find_by_name(&self, name: &str) -> Result<Vec<WorkflowSummary>, BackendError> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.name == name)
            .cloned()
            .collect())
    }
    async fn create_workflow(&self, name: &str) -> Result<WorkflowSummary, BackendError> {
        let row = WorkflowSummary {
            id: self.next_id("wf"),
            name: name.to_string(),
            status: "draft".into(),
        };
        self.workflows.lock().unwrap().push(row.clone());
        Ok(row)
    }
    async fn create_trigger(
        &self,
        _workflow_id: &str,
        _trigger_type: &str,
    ) -> Result<String, BackendError> {
        Ok(self.next_id("tr"))
    }
    async fn update_workflow(&self, document: &WorkflowDocument) -> Result<(), BackendError> {
        for row in self.workflows.lock().unwrap().iter_mut() {
            if row.id == document.id {
                row.status = document.status.clone();
            }
        }
        Ok(())
    }
    async fn delete_workflow(&self, workflow_id: &str) -> Result<(), BackendError> {
        self.workflows.lock().unwrap().retain(|w| w.id != workflow_id);
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct TestServer {
    base: String,
    http: reqwest::Client,
    store: Arc<LibSqlBackend>,
    registration: Arc<StubRegistration>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, tenant: &str, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut req = self.http.post(self.url(path)).header(TENANT_HEADER, tenant);
        if let Some(body) = body {
            req = req.json(&body);
        }
        read(req.send().await.unwrap()).await
    }

    async fn get(&self, tenant: &str, path: &str) -> (u16, Value) {
        let req = self.http.get(self.url(path)).header(TENANT_HEADER, tenant);
        read(req.send().await.unwrap()).await
    }

    async fn webhook(&self, body: Value) -> (u16, Value) {
        let req = self.http.post(self.url("/webhooks/registration")).json(&body);
        read(req.send().await.unwrap()).await
    }
}

async fn read(resp: reqwest::Response) -> (u16, Value) {
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

/// Start an Axum server on a random port.
async fn start_server() -> TestServer {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let registration = Arc::new(StubRegistration::default());
    let shared: Arc<dyn RegistrationStore> = store.clone();

    let orchestrator = Arc::new(StepOrchestrator::new(
        Arc::clone(&shared),
        registration.clone(),
        CompliancePolicies {
            customer_profile: "RN_cp".into(),
            trust_product: "RN_tp".into(),
        },
        CampaignConfig::default(),
        SagaConfig::default(),
    ));
    let ingestor = Arc::new(WebhookIngestor::new(
        Arc::clone(&shared),
        Arc::clone(&orchestrator),
    ));
    let automation = Arc::new(AutomationBootstrapper::new(
        Arc::clone(&shared),
        Arc::new(StubPlatform::default()),
        "Auto Reply",
        "http://onboard.test",
        Duration::from_secs(2),
    ));
    let router = app(AppServices {
        orchestrator,
        ingestor,
        automation,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        http: reqwest::Client::new(),
        store,
        registration,
    }
}

fn business_info() -> Value {
    json!({
        "legalName": "Harbor Realty LLC",
        "ein": "12-3456789",
        "businessType": "Limited Liability Corporation",
        "industry": "REAL_ESTATE",
        "website": "https://harbor-realty.example",
        "email": "ops@harbor-realty.example",
        "phoneNumber": "+15555550100",
        "address": {
            "street": "1 Pier Way",
            "city": "Portland",
            "region": "ME",
            "postalCode": "04101",
            "country": "US"
        },
        "representative": {
            "firstName": "Dana",
            "lastName": "Reyes",
            "email": "dana@harbor-realty.example",
            "phoneNumber": "+15555550101",
            "businessTitle": "Owner",
            "jobPosition": "CEO"
        }
    })
}

fn brand_event(account: &str, status: &str, errors: Value) -> Value {
    json!({"data": {
        "type": "com.twilio.messaging.compliance.brand-registration.brand-registered",
        "accountsid": account,
        "brandstatus": status,
        "identitystatus": "VERIFIED",
        "errors": errors
    }})
}

/// Create the profile for `tenant` and run the five steps.
async fn onboard(server: &TestServer, tenant: &str) -> Value {
    let (status, _) = server
        .post(tenant, "/registration", Some(business_info()))
        .await;
    assert_eq!(status, 201);
    let (status, report) = server.post(tenant, "/register", None).await;
    assert_eq!(status, 200, "register failed: {report}");
    report
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_through_brand_verification() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let report = onboard(&server, "T1").await;

        assert_eq!(report["executed"].as_array().unwrap().len(), 5);
        let profile = &report["profile"];
        assert_eq!(profile["subaccountId"], "AC_1");
        assert!(profile["customerProfileId"].is_string());
        assert!(profile["trustProductId"].is_string());
        assert!(profile["brandRegistrationId"].is_string());
        assert_eq!(profile["brandStatus"], "pending");
        assert!(profile["messagingServiceId"].is_null());

        let (status, body) = server
            .webhook(brand_event("AC_1", "registered", json!([])))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["events"][0]["outcome"], "continuation_ran");

        let (_, profile) = server.get("T1", "/registration").await;
        assert_eq!(profile["brandStatus"], "verified");
        assert_eq!(profile["messagingServiceId"], "MG_1");
        assert_eq!(profile["campaignId"], "QE_1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_webhook_creates_one_service_and_campaign() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        onboard(&server, "T1").await;

        let event = brand_event("AC_1", "registered", json!([]));
        server.webhook(event.clone()).await;
        let (status, body) = server.webhook(json!([event.clone(), event])).await;
        assert_eq!(status, 200);
        assert_eq!(body["events"][0]["outcome"], "applied");
        assert_eq!(body["events"][1]["outcome"], "applied");

        assert_eq!(server.registration.count("create_messaging_service"), 1);
        assert_eq!(server.registration.count("create_campaign"), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn campaign_event_before_brand_verification_is_ignored() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        onboard(&server, "T1").await;

        let (status, body) = server
            .webhook(json!({"data": {
                "type": "com.twilio.messaging.compliance.campaign-registration.campaign-approved",
                "accountsid": "AC_1",
                "campaignstatus": "VERIFIED"
            }}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["events"][0]["reason"], "campaign_not_created");

        let (_, profile) = server.get("T1", "/registration").await;
        assert_eq!(profile["brandStatus"], "pending");
        assert!(profile["campaignStatus"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stale_brand_event_after_verification_keeps_verified() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        onboard(&server, "T1").await;
        server
            .webhook(brand_event("AC_1", "registered", json!([])))
            .await;

        // Redelivered earlier states arrive after verification.
        let (status, body) = server
            .webhook(json!([
                brand_event("AC_1", "pending", json!([])),
                brand_event("AC_1", "failed", json!([])),
                brand_event("AC_1", "registered", json!([]))
            ]))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let (_, profile) = server.get("T1", "/registration").await;
        assert_eq!(profile["brandStatus"], "verified");
        assert_eq!(profile["messagingServiceId"], "MG_1");
        assert_eq!(profile["campaignId"], "QE_1");
        assert_eq!(server.registration.count("create_messaging_service"), 1);
        assert_eq!(server.registration.count("create_campaign"), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn brand_errors_from_separate_deliveries_are_merged() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        onboard(&server, "T1").await;

        server
            .webhook(brand_event(
                "AC_1",
                "failed",
                json!([{"code": 30794, "description": "EIN mismatch"}]),
            ))
            .await;
        server
            .webhook(brand_event(
                "AC_1",
                "failed",
                json!([{"code": 30795, "description": "Website unreachable"}]),
            ))
            .await;

        let (_, profile) = server.get("T1", "/registration").await;
        assert_eq!(profile["brandStatus"], "rejected");
        let errors = profile["brandStatusErrors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["description"], "EIN mismatch");
        assert_eq!(errors[1]["description"], "Website unreachable");
        assert_eq!(server.registration.count("create_messaging_service"), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rerun_after_failure_resumes_at_failed_step() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server
            .post("T1", "/registration", Some(business_info()))
            .await;
        server.registration.fail_on(Some("create_brand_registration"));

        let (status, body) = server.post("T1", "/register", None).await;
        assert_eq!(status, 502);
        assert_eq!(body["error"]["code"], "STEP_FAILED");
        assert_eq!(body["error"]["step"], "brand_registration");

        server.registration.fail_on(None);
        let (status, report) = server.post("T1", "/register", None).await;
        assert_eq!(status, 200);
        assert_eq!(report["executed"], json!(["brand_registration"]));
        assert_eq!(report["skipped"].as_array().unwrap().len(), 4);

        assert_eq!(server.registration.count("create_subaccount"), 1);
        assert_eq!(server.registration.count("create_trust_product"), 1);
        assert_eq!(server.registration.count("create_brand_registration"), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_continuation_is_reconciled() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        onboard(&server, "T1").await;
        server.registration.fail_on(Some("create_campaign"));

        let (status, body) = server
            .webhook(brand_event("AC_1", "registered", json!([])))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], false);

        let stalled = server.store.list_stalled_continuations().await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert!(stalled[0].messaging_service_id.is_some());

        server.registration.fail_on(None);
        let resp = server
            .http
            .post(server.url("/webhooks/registration/reconcile"))
            .send()
            .await
            .unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 200);
        assert_eq!(body["tenants"][0]["tenantId"], "T1");
        assert_eq!(body["tenants"][0]["outcome"]["outcome"], "completed");
        assert_eq!(server.registration.count("create_messaging_service"), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unparsable_webhook_is_rejected_but_logged() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let resp = server
            .http
            .post(server.url("/webhooks/registration"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let log = server.store.list_webhook_events(5).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].body, "{not json");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_account_webhook_is_acknowledged() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let (status, body) = server
            .webhook(brand_event("AC_unknown", "registered", json!([])))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["events"][0]["reason"], "unknown_account");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn tenant_header_is_required() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let resp = server.http.post(server.url("/register")).send().await.unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 401);
        assert_eq!(body["error"]["code"], "TENANT_REQUIRED");

        let (status, body) = server.get("T404", "/registration").await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["code"], "PROFILE_NOT_FOUND");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn automation_lifecycle_and_teardown() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (status, body) = server.get("T1", "/automation").await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"isExists": false, "count": 0, "rows": []}));

        let (status, created) = server.post("T1", "/automation", None).await;
        assert_eq!(status, 201);
        let workflow_id = created["workflowId"].as_str().unwrap().to_string();
        let trigger_id = created["triggerId"].as_str().unwrap().to_string();

        let resp = server
            .http
            .put(server.url("/automation"))
            .header(TENANT_HEADER, "T1")
            .json(&json!({"workflowId": workflow_id, "triggerId": trigger_id}))
            .send()
            .await
            .unwrap();
        let (status, configured) = read(resp).await;
        assert_eq!(status, 200);
        assert_eq!(configured["state"], "configured");
        assert!(configured["templateId"].is_string());

        let (_, body) = server.get("T1", "/automation").await;
        assert_eq!(body["isExists"], true);
        assert_eq!(body["count"], 1);

        // Another tenant cannot tear it down.
        let resp = server
            .http
            .delete(server.url("/automation"))
            .header(TENANT_HEADER, "T2")
            .json(&json!({"workflowId": workflow_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 403);

        // Unselecting every target tears the automation down.
        let resp = server
            .http
            .put(server.url("/automation/targets"))
            .header(TENANT_HEADER, "T1")
            .json(&json!({"targets": []}))
            .send()
            .await
            .unwrap();
        let (status, outcome) = read(resp).await;
        assert_eq!(status, 200);
        assert_eq!(outcome["outcome"], "deleted");
        assert_eq!(outcome["workflowId"], workflow_id);

        let (_, body) = server.get("T1", "/automation").await;
        assert_eq!(body["isExists"], false);
        assert_eq!(body["count"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let resp = server.http.get(server.url("/health")).send().await.unwrap();
        let (status, body) = read(resp).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}
