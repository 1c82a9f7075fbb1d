//! Registration profile and related data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Postal address for the business.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PostalAddress {
    pub street: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_secondary: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    /// ISO country code, e.g. "US".
    pub country: String,
}

/// The person legally authorized to act for the business.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedRepresentative {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub business_title: String,
    pub job_position: String,
}

/// Business identity submitted during onboarding.
///
/// Set once when the profile is created and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInfo {
    pub legal_name: String,
    /// Employer identification number.
    pub ein: String,
    pub business_type: String,
    pub industry: String,
    pub website: String,
    pub email: String,
    pub phone_number: String,
    pub address: PostalAddress,
    pub representative: AuthorizedRepresentative,
}

/// Brand registration status as tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrandStatus {
    #[default]
    Unknown,
    Pending,
    Verified,
    Rejected,
}

impl BrandStatus {
    /// Map a status string reported by the registration backend.
    pub fn from_backend(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "registered" | "approved" | "verified" => Self::Verified,
            "pending" | "in_review" | "in-review" => Self::Pending,
            "failed" | "rejected" | "suspended" => Self::Rejected,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for BrandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BrandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown brand status: {other}")),
        }
    }
}

/// A structured error reported against a brand registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BrandStatusError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl BrandStatusError {
    /// Stable identity used to avoid storing the same error twice.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.code.as_deref().unwrap_or_default(),
            self.field.as_deref().unwrap_or_default(),
            self.description.trim()
        )
    }
}

/// Per-tenant onboarding progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationProfile {
    pub tenant_id: String,
    pub business_info: BusinessInfo,
    pub subaccount_id: Option<String>,
    pub customer_profile_id: Option<String>,
    /// Review state of the customer profile; present once it has been submitted.
    pub customer_profile_status: Option<String>,
    pub trust_product_id: Option<String>,
    pub brand_registration_id: Option<String>,
    pub brand_status: BrandStatus,
    pub identity_status: Option<String>,
    pub brand_status_errors: Vec<BrandStatusError>,
    pub messaging_service_id: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_status: Option<String>,
    pub campaign_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationProfile {
    /// A brand-new profile with no steps completed.
    pub fn new(tenant_id: impl Into<String>, business_info: BusinessInfo) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            business_info,
            subaccount_id: None,
            customer_profile_id: None,
            customer_profile_status: None,
            trust_product_id: None,
            brand_registration_id: None,
            brand_status: BrandStatus::Unknown,
            identity_status: None,
            brand_status_errors: Vec::new(),
            messaging_service_id: None,
            campaign_id: None,
            campaign_status: None,
            campaign_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_brand_verified(&self) -> bool {
        self.brand_status == BrandStatus::Verified
    }

    /// Brand is verified but the messaging service or campaign is still missing.
    pub fn continuation_pending(&self) -> bool {
        self.is_brand_verified()
            && (self.messaging_service_id.is_none() || self.campaign_id.is_none())
    }
}

/// Field-level update for a profile.
///
/// Only `Some` fields are written. Identifier fields are set-once: a value
/// already stored is kept and the patch value is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub subaccount_id: Option<String>,
    pub customer_profile_id: Option<String>,
    pub customer_profile_status: Option<String>,
    pub trust_product_id: Option<String>,
    pub brand_registration_id: Option<String>,
    /// Overwrites the current brand status.
    pub brand_status: Option<BrandStatus>,
    /// Written only while the stored status is still `unknown`.
    pub initial_brand_status: Option<BrandStatus>,
    pub identity_status: Option<String>,
    /// Appended; entries already stored are skipped.
    pub brand_status_errors: Vec<BrandStatusError>,
    /// Requires a verified brand.
    pub messaging_service_id: Option<String>,
    /// Requires a verified brand.
    pub campaign_id: Option<String>,
    pub campaign_status: Option<String>,
    pub campaign_payload: Option<serde_json::Value>,
}

impl ProfilePatch {
    /// Whether this patch writes continuation-only identifiers.
    pub fn touches_continuation(&self) -> bool {
        self.messaging_service_id.is_some() || self.campaign_id.is_some()
    }
}

/// Kinds of external identifiers a profile can be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalIdKind {
    /// The tenant's sub-account, carried as `accountsid` on webhooks.
    Subaccount,
}

impl ExternalIdKind {
    /// Column holding this identifier in `registration_profiles`.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Subaccount => "subaccount_id",
        }
    }
}
