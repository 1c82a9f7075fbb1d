//! Step orchestrator — drives a tenant through the ordered onboarding steps
//! and owns the post-verification continuation.
//!
//! Every step is gated on its persisted postcondition, so a run after a
//! failure re-enters at the first incomplete step and never repeats an
//! external side effect that was already recorded.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::backend::{
    BundleRequest, CampaignRequest, EndUserKind, EndUserRequest, RegistrationBackend, bounded,
};
use crate::config::{CampaignConfig, RegistrationApiConfig, SagaConfig};
use crate::error::{BackendError, DatabaseError, SagaError};
use crate::registration::model::{
    BrandStatus, BusinessInfo, ProfilePatch, RegistrationProfile,
};
use crate::registration::steps::OnboardingStep;
use crate::store::RegistrationStore;

/// Policies the compliance bundles are evaluated against.
#[derive(Debug, Clone)]
pub struct CompliancePolicies {
    pub customer_profile: String,
    pub trust_product: String,
}

impl From<&RegistrationApiConfig> for CompliancePolicies {
    fn from(config: &RegistrationApiConfig) -> Self {
        Self {
            customer_profile: config.customer_profile_policy_sid.clone(),
            trust_product: config.trust_product_policy_sid.clone(),
        }
    }
}

/// What happened when the continuation was asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContinuationOutcome {
    /// Messaging service and campaign now both exist.
    Completed {
        messaging_service_id: String,
        campaign_id: String,
    },
    /// Both identifiers were already present.
    AlreadyComplete,
    /// Brand is not verified; nothing may be created yet.
    NotVerified,
    /// Another writer holds the continuation lease.
    ClaimedElsewhere,
}

/// Summary of one orchestration run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub tenant_id: String,
    pub executed: Vec<OnboardingStep>,
    pub skipped: Vec<OnboardingStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<ContinuationOutcome>,
    pub profile: RegistrationProfile,
}

pub struct StepOrchestrator {
    store: Arc<dyn RegistrationStore>,
    backend: Arc<dyn RegistrationBackend>,
    policies: CompliancePolicies,
    campaign: CampaignConfig,
    saga: SagaConfig,
}

impl StepOrchestrator {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        backend: Arc<dyn RegistrationBackend>,
        policies: CompliancePolicies,
        campaign: CampaignConfig,
        saga: SagaConfig,
    ) -> Self {
        Self {
            store,
            backend,
            policies,
            campaign,
            saga,
        }
    }

    /// Create the tenant's profile with its business identity. An existing
    /// profile is returned unchanged with `false`.
    pub async fn create_profile(
        &self,
        tenant_id: &str,
        business_info: &BusinessInfo,
    ) -> Result<(RegistrationProfile, bool), SagaError> {
        Ok(self.store.create_profile(tenant_id, business_info).await?)
    }

    pub async fn profile(&self, tenant_id: &str) -> Result<RegistrationProfile, SagaError> {
        self.store
            .get_profile(tenant_id)
            .await?
            .ok_or_else(|| SagaError::ProfileNotFound {
                tenant_id: tenant_id.to_string(),
            })
    }

    /// Run every incomplete step in order, persisting each result before the
    /// next step starts. The first failure aborts the run.
    pub async fn run(&self, tenant_id: &str) -> Result<RunReport, SagaError> {
        let mut profile = self.profile(tenant_id).await?;
        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        for step in OnboardingStep::ALL {
            if step.is_complete(&profile) {
                debug!(tenant_id, step = %step, "Step already complete, skipping");
                skipped.push(step);
                continue;
            }

            info!(tenant_id, step = %step, "Running onboarding step");
            let patch = match self.execute(step, &profile).await {
                Ok(patch) => patch,
                Err(e) => {
                    warn!(tenant_id, step = %step, error = %e, "Onboarding step failed");
                    return Err(e);
                }
            };
            profile = self.store.merge_profile(tenant_id, &patch).await?;
            info!(
                tenant_id,
                step = %step,
                field = step.postcondition_field(),
                "Onboarding step complete"
            );
            executed.push(step);
        }

        let continuation = if profile.continuation_pending() {
            let outcome = self.resume_continuation(tenant_id).await?;
            profile = self.profile(tenant_id).await?;
            Some(outcome)
        } else {
            None
        };

        Ok(RunReport {
            tenant_id: tenant_id.to_string(),
            executed,
            skipped,
            continuation,
            profile,
        })
    }

    /// Resolve a step's prerequisites and run it against the backend.
    async fn execute(
        &self,
        step: OnboardingStep,
        profile: &RegistrationProfile,
    ) -> Result<ProfilePatch, SagaError> {
        let result = match step {
            OnboardingStep::Subaccount => self.create_subaccount(profile).await,
            OnboardingStep::CustomerProfile => {
                let account = require(profile, "subaccountId", &profile.subaccount_id)?;
                self.create_customer_profile(account, &profile.business_info)
                    .await
            }
            OnboardingStep::CustomerProfileReview => {
                let account = require(profile, "subaccountId", &profile.subaccount_id)?;
                let cp = require(profile, "customerProfileId", &profile.customer_profile_id)?;
                self.submit_customer_profile(account, cp).await
            }
            OnboardingStep::TrustProduct => {
                let account = require(profile, "subaccountId", &profile.subaccount_id)?;
                let cp = require(profile, "customerProfileId", &profile.customer_profile_id)?;
                self.create_trust_product(account, cp, &profile.business_info)
                    .await
            }
            OnboardingStep::BrandRegistration => {
                let account = require(profile, "subaccountId", &profile.subaccount_id)?;
                let cp = require(profile, "customerProfileId", &profile.customer_profile_id)?;
                let tp = require(profile, "trustProductId", &profile.trust_product_id)?;
                self.register_brand(account, cp, tp).await
            }
        };
        result.map_err(|source| SagaError::StepFailed { step, source })
    }

    // ── Steps ───────────────────────────────────────────────────────

    async fn create_subaccount(
        &self,
        profile: &RegistrationProfile,
    ) -> Result<ProfilePatch, BackendError> {
        let name = format!(
            "{} ({})",
            profile.business_info.legal_name, profile.tenant_id
        );
        let id = bounded(
            "create_subaccount",
            self.saga.call_timeout,
            self.backend.create_subaccount(&name),
        )
        .await?;
        Ok(ProfilePatch {
            subaccount_id: Some(id),
            ..Default::default()
        })
    }

    async fn create_customer_profile(
        &self,
        account: &str,
        info: &BusinessInfo,
    ) -> Result<ProfilePatch, BackendError> {
        let limit = self.saga.call_timeout;
        let backend = &self.backend;

        let bundle = BundleRequest {
            friendly_name: info.legal_name.clone(),
            email: info.email.clone(),
            policy_sid: self.policies.customer_profile.clone(),
        };
        let cp = bounded(
            "create_customer_profile",
            limit,
            backend.create_customer_profile(account, &bundle),
        )
        .await?;

        let end_users = [
            EndUserRequest {
                kind: EndUserKind::CustomerProfileBusinessInformation,
                friendly_name: format!("{} business information", info.legal_name),
                attributes: json!({
                    "business_name": info.legal_name,
                    "business_identity": "direct_customer",
                    "business_type": info.business_type,
                    "business_industry": info.industry,
                    "business_registration_identifier": "EIN",
                    "business_registration_number": info.ein,
                    "business_regions_of_operation": "USA_AND_CANADA",
                    "website_url": info.website,
                }),
            },
            EndUserRequest {
                kind: EndUserKind::AuthorizedRepresentative1,
                friendly_name: format!(
                    "{} {}",
                    info.representative.first_name, info.representative.last_name
                ),
                attributes: json!({
                    "first_name": info.representative.first_name,
                    "last_name": info.representative.last_name,
                    "email": info.representative.email,
                    "phone_number": info.representative.phone_number,
                    "business_title": info.representative.business_title,
                    "job_position": info.representative.job_position,
                }),
            },
        ];
        for request in &end_users {
            let end_user = bounded(
                "create_end_user",
                limit,
                backend.create_end_user(account, request),
            )
            .await?;
            bounded(
                "attach_to_customer_profile",
                limit,
                backend.attach_to_customer_profile(account, &cp, &end_user),
            )
            .await?;
        }

        let address = bounded(
            "create_address",
            limit,
            backend.create_address(account, &info.legal_name, &info.address),
        )
        .await?;
        let document = bounded(
            "create_supporting_document",
            limit,
            backend.create_supporting_document(
                account,
                &format!("{} address", info.legal_name),
                "customer_profile_address",
                &json!({ "address_sids": address }),
            ),
        )
        .await?;
        bounded(
            "attach_to_customer_profile",
            limit,
            backend.attach_to_customer_profile(account, &cp, &document),
        )
        .await?;

        Ok(ProfilePatch {
            customer_profile_id: Some(cp),
            ..Default::default()
        })
    }

    async fn submit_customer_profile(
        &self,
        account: &str,
        customer_profile_id: &str,
    ) -> Result<ProfilePatch, BackendError> {
        let limit = self.saga.call_timeout;
        let evaluation = bounded(
            "evaluate_customer_profile",
            limit,
            self.backend
                .evaluate_customer_profile(account, customer_profile_id),
        )
        .await?;
        if !evaluation.is_compliant() {
            return Err(BackendError::InvalidResponse {
                operation: "evaluate_customer_profile".into(),
                reason: format!("evaluation {} is {}", evaluation.sid, evaluation.status),
            });
        }

        let status = bounded(
            "submit_customer_profile",
            limit,
            self.backend
                .submit_customer_profile(account, customer_profile_id),
        )
        .await?;
        Ok(ProfilePatch {
            customer_profile_status: Some(status),
            ..Default::default()
        })
    }

    async fn create_trust_product(
        &self,
        account: &str,
        customer_profile_id: &str,
        info: &BusinessInfo,
    ) -> Result<ProfilePatch, BackendError> {
        let limit = self.saga.call_timeout;
        let backend = &self.backend;

        let bundle = BundleRequest {
            friendly_name: format!("{} messaging", info.legal_name),
            email: info.email.clone(),
            policy_sid: self.policies.trust_product.clone(),
        };
        let tp = bounded(
            "create_trust_product",
            limit,
            backend.create_trust_product(account, &bundle),
        )
        .await?;

        let messaging_profile = EndUserRequest {
            kind: EndUserKind::UsA2pMessagingProfileInformation,
            friendly_name: format!("{} messaging profile", info.legal_name),
            attributes: json!({
                "company_type": "private",
                "brand_contact_email": info.email,
            }),
        };
        let end_user = bounded(
            "create_end_user",
            limit,
            backend.create_end_user(account, &messaging_profile),
        )
        .await?;
        for object_id in [end_user.as_str(), customer_profile_id] {
            bounded(
                "attach_to_trust_product",
                limit,
                backend.attach_to_trust_product(account, &tp, object_id),
            )
            .await?;
        }

        let evaluation = bounded(
            "evaluate_trust_product",
            limit,
            backend.evaluate_trust_product(account, &tp),
        )
        .await?;
        if !evaluation.is_compliant() {
            return Err(BackendError::InvalidResponse {
                operation: "evaluate_trust_product".into(),
                reason: format!("evaluation {} is {}", evaluation.sid, evaluation.status),
            });
        }
        bounded(
            "submit_trust_product",
            limit,
            backend.submit_trust_product(account, &tp),
        )
        .await?;

        Ok(ProfilePatch {
            trust_product_id: Some(tp),
            ..Default::default()
        })
    }

    async fn register_brand(
        &self,
        account: &str,
        customer_profile_id: &str,
        trust_product_id: &str,
    ) -> Result<ProfilePatch, BackendError> {
        let brand = bounded(
            "create_brand_registration",
            self.saga.call_timeout,
            self.backend
                .create_brand_registration(account, customer_profile_id, trust_product_id),
        )
        .await?;
        debug!(brand_registration_id = %brand.sid, status = %brand.status, "Brand registration created");
        Ok(ProfilePatch {
            brand_registration_id: Some(brand.sid),
            initial_brand_status: Some(BrandStatus::Pending),
            ..Default::default()
        })
    }

    // ── Continuation ────────────────────────────────────────────────

    /// Create the messaging service and campaign for a verified brand.
    ///
    /// Runs only while the brand is verified and the continuation is
    /// incomplete, under a lease so concurrent callers create nothing twice.
    pub async fn resume_continuation(
        &self,
        tenant_id: &str,
    ) -> Result<ContinuationOutcome, SagaError> {
        let profile = self.profile(tenant_id).await?;
        if !profile.is_brand_verified() {
            debug!(tenant_id, brand_status = %profile.brand_status, "Continuation skipped, brand not verified");
            return Ok(ContinuationOutcome::NotVerified);
        }
        if !profile.continuation_pending() {
            debug!(tenant_id, "Continuation already complete");
            return Ok(ContinuationOutcome::AlreadyComplete);
        }
        if !self
            .store
            .try_claim_continuation(tenant_id, self.saga.continuation_lease)
            .await?
        {
            info!(tenant_id, "Continuation claimed by another writer, skipping");
            return Ok(ContinuationOutcome::ClaimedElsewhere);
        }

        let result = self.run_claimed_continuation(tenant_id).await;
        if let Err(e) = self.store.release_continuation(tenant_id).await {
            warn!(tenant_id, error = %e, "Failed to release continuation lease");
        }
        match &result {
            Ok(outcome) => info!(tenant_id, ?outcome, "Continuation finished"),
            Err(e) => warn!(tenant_id, error = %e, "Continuation failed"),
        }
        result
    }

    async fn run_claimed_continuation(
        &self,
        tenant_id: &str,
    ) -> Result<ContinuationOutcome, SagaError> {
        // Re-read under the lease; a webhook may have changed the brand.
        let profile = self.profile(tenant_id).await?;
        if !profile.is_brand_verified() {
            return Ok(ContinuationOutcome::NotVerified);
        }
        let account = require(&profile, "subaccountId", &profile.subaccount_id)?.to_string();
        let brand_registration_id =
            require(&profile, "brandRegistrationId", &profile.brand_registration_id)?.to_string();

        let messaging_service_id = match profile.messaging_service_id.clone() {
            Some(id) => id,
            None => {
                let name = format!("{} messaging", profile.business_info.legal_name);
                let id = bounded(
                    "create_messaging_service",
                    self.saga.call_timeout,
                    self.backend.create_messaging_service(&account, &name),
                )
                .await
                .map_err(|source| SagaError::ContinuationFailed {
                    stage: "messaging_service",
                    source,
                })?;
                let merged = self
                    .merge_continuation(
                        tenant_id,
                        ProfilePatch {
                            messaging_service_id: Some(id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                merged.messaging_service_id.unwrap_or(id)
            }
        };

        let campaign_id = match profile.campaign_id.clone() {
            Some(id) => id,
            None => {
                let request = CampaignRequest {
                    brand_registration_id,
                    use_case: self.campaign.use_case.clone(),
                    description: self.campaign.description.clone(),
                    message_flow: self.campaign.message_flow.clone(),
                    message_samples: self.campaign.message_samples.clone(),
                    has_embedded_links: self.campaign.has_embedded_links,
                    has_embedded_phone: self.campaign.has_embedded_phone,
                };
                let id = bounded(
                    "create_campaign",
                    self.saga.call_timeout,
                    self.backend
                        .create_campaign(&account, &messaging_service_id, &request),
                )
                .await
                .map_err(|source| SagaError::ContinuationFailed {
                    stage: "campaign",
                    source,
                })?;
                let merged = self
                    .merge_continuation(
                        tenant_id,
                        ProfilePatch {
                            campaign_id: Some(id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                merged.campaign_id.unwrap_or(id)
            }
        };

        Ok(ContinuationOutcome::Completed {
            messaging_service_id,
            campaign_id,
        })
    }

    /// Store continuation identifiers; a brand that lost verification in the
    /// meantime is an inconsistent state.
    async fn merge_continuation(
        &self,
        tenant_id: &str,
        patch: ProfilePatch,
    ) -> Result<RegistrationProfile, SagaError> {
        match self.store.merge_profile(tenant_id, &patch).await {
            Ok(profile) => Ok(profile),
            Err(DatabaseError::Constraint(reason)) => Err(SagaError::InconsistentState {
                tenant_id: tenant_id.to_string(),
                reason,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// A field an earlier step should have set.
fn require<'a>(
    profile: &RegistrationProfile,
    field: &str,
    value: &'a Option<String>,
) -> Result<&'a str, SagaError> {
    value.as_deref().ok_or_else(|| SagaError::InconsistentState {
        tenant_id: profile.tenant_id.clone(),
        reason: format!("{field} is missing"),
    })
}
