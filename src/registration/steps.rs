//! Onboarding steps and their postconditions.

use serde::{Deserialize, Serialize};

use super::model::RegistrationProfile;

/// The externally side-effecting steps of tenant onboarding, in run order.
///
/// Each step is complete once its postcondition field is present on the
/// profile; a complete step is never executed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Subaccount,
    CustomerProfile,
    CustomerProfileReview,
    TrustProduct,
    BrandRegistration,
}

impl OnboardingStep {
    /// All steps in the order they run.
    pub const ALL: [OnboardingStep; 5] = [
        Self::Subaccount,
        Self::CustomerProfile,
        Self::CustomerProfileReview,
        Self::TrustProduct,
        Self::BrandRegistration,
    ];

    /// Whether the step's postcondition already holds for `profile`.
    pub fn is_complete(&self, profile: &RegistrationProfile) -> bool {
        match self {
            Self::Subaccount => profile.subaccount_id.is_some(),
            Self::CustomerProfile => profile.customer_profile_id.is_some(),
            Self::CustomerProfileReview => profile.customer_profile_status.is_some(),
            Self::TrustProduct => profile.trust_product_id.is_some(),
            Self::BrandRegistration => profile.brand_registration_id.is_some(),
        }
    }

    /// Name of the profile field this step sets.
    pub fn postcondition_field(&self) -> &'static str {
        match self {
            Self::Subaccount => "subaccountId",
            Self::CustomerProfile => "customerProfileId",
            Self::CustomerProfileReview => "customerProfileStatus",
            Self::TrustProduct => "trustProductId",
            Self::BrandRegistration => "brandRegistrationId",
        }
    }

    /// First step whose postcondition does not hold yet.
    pub fn first_incomplete(profile: &RegistrationProfile) -> Option<OnboardingStep> {
        Self::ALL.into_iter().find(|step| !step.is_complete(profile))
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Subaccount => "subaccount",
            Self::CustomerProfile => "customer_profile",
            Self::CustomerProfileReview => "customer_profile_review",
            Self::TrustProduct => "trust_product",
            Self::BrandRegistration => "brand_registration",
        };
        write!(f, "{s}")
    }
}
