//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Registration backend connection settings.
#[derive(Debug, Clone)]
pub struct RegistrationApiConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Policy the customer profile is evaluated against.
    pub customer_profile_policy_sid: String,
    /// Policy the messaging trust product is evaluated against.
    pub trust_product_policy_sid: String,
}

/// Automation platform connection settings.
#[derive(Debug, Clone)]
pub struct AutomationApiConfig {
    pub base_url: String,
    pub api_key: SecretString,
    /// Automation names are `"{name_prefix} {tenant_id}"`.
    pub name_prefix: String,
}

/// Defaults used when registering the compliance campaign.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub use_case: String,
    pub description: String,
    pub message_flow: String,
    pub message_samples: Vec<String>,
    pub has_embedded_links: bool,
    pub has_embedded_phone: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            use_case: "CUSTOMER_CARE".to_string(),
            description: "Replies to inbound inquiries from prospective and existing customers \
                          about listings, showings and account questions."
                .to_string(),
            message_flow: "Customers text the business number first; replies are sent only in \
                           response to their messages. Reply STOP to opt out."
                .to_string(),
            message_samples: vec![
                "Thanks for reaching out! A showing is available Saturday at 10am, does that work?"
                    .to_string(),
                "Hi, following up on your question about the property. Reply STOP to opt out."
                    .to_string(),
            ],
            has_embedded_links: false,
            has_embedded_phone: false,
        }
    }
}

/// Saga timing knobs.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Upper bound on every external call.
    pub call_timeout: Duration,
    /// How long a continuation claim is honored before another writer may take over.
    pub continuation_lease: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            continuation_lease: Duration::from_secs(120),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Externally reachable base URL of this service, used for webhook callbacks.
    pub public_base_url: String,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub registration: RegistrationApiConfig,
    pub automation: AutomationApiConfig,
    pub campaign: CampaignConfig,
    pub saga: SagaConfig,
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = parsed("ONBOARD_PORT", 8080)?;
        let db_path = std::env::var("ONBOARD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/onboard.db"));
        let public_base_url = std::env::var("ONBOARD_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));
        let log_dir = std::env::var("ONBOARD_LOG_DIR").ok().map(PathBuf::from);

        let registration = RegistrationApiConfig {
            base_url: required("REGISTRATION_API_BASE")?,
            account_sid: required("REGISTRATION_ACCOUNT_SID")?,
            auth_token: SecretString::from(required("REGISTRATION_AUTH_TOKEN")?),
            customer_profile_policy_sid: std::env::var("REGISTRATION_CUSTOMER_PROFILE_POLICY")
                .unwrap_or_else(|_| "RNdfbf3fae0e1107f8aded0e7cead80bf5".to_string()),
            trust_product_policy_sid: std::env::var("REGISTRATION_TRUST_PRODUCT_POLICY")
                .unwrap_or_else(|_| "RNb0d4771c2c98518d916a3d4cd70a8f8b".to_string()),
        };

        let automation = AutomationApiConfig {
            base_url: required("AUTOMATION_API_BASE")?,
            api_key: SecretString::from(required("AUTOMATION_API_KEY")?),
            name_prefix: std::env::var("AUTOMATION_NAME_PREFIX")
                .unwrap_or_else(|_| "Auto Reply".to_string()),
        };

        let mut campaign = CampaignConfig::default();
        if let Ok(use_case) = std::env::var("CAMPAIGN_USE_CASE") {
            campaign.use_case = use_case;
        }
        if let Ok(description) = std::env::var("CAMPAIGN_DESCRIPTION") {
            campaign.description = description;
        }
        if let Ok(samples) = std::env::var("CAMPAIGN_MESSAGE_SAMPLES") {
            let samples: Vec<String> = samples
                .split('|')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !samples.is_empty() {
                campaign.message_samples = samples;
            }
        }

        let saga = SagaConfig {
            call_timeout: Duration::from_secs(parsed("ONBOARD_CALL_TIMEOUT_SECS", 30u64)?),
            continuation_lease: Duration::from_secs(parsed(
                "ONBOARD_CONTINUATION_LEASE_SECS",
                120u64,
            )?),
        };

        Ok(Self {
            port,
            db_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            log_dir,
            registration,
            automation,
            campaign,
            saga,
        })
    }
}
