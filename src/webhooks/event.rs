//! Registration status-change events delivered by the backend.
//!
//! Deliveries are loosely shaped JSON. Each event is classified into a closed
//! set of kinds by its `type` discriminator; anything else becomes
//! [`RegistrationEvent::Unrecognized`] instead of a parse failure.

use serde::Deserialize;
use serde_json::Value;

use crate::error::WebhookError;
use crate::registration::model::{BrandStatus, BrandStatusError};

const TYPE_PREFIX: &str = "com.twilio.messaging.compliance.";

/// A delivery body: one event or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Batch(Vec<Value>),
    Single(Value),
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(body).map_err(|e| WebhookError::Unparsable(e.to_string()))
    }

    pub fn into_events(self) -> Vec<Value> {
        match self {
            Self::Batch(events) => events,
            Self::Single(event) => vec![event],
        }
    }
}

/// Brand registration status change.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandEvent {
    pub event_type: String,
    pub account_sid: Option<String>,
    pub brand_registration_id: Option<String>,
    /// Status string as reported, before mapping.
    pub raw_status: Option<String>,
    pub identity_status: Option<String>,
    pub errors: Vec<BrandStatusError>,
}

impl BrandEvent {
    pub fn brand_status(&self) -> BrandStatus {
        self.raw_status
            .as_deref()
            .map(BrandStatus::from_backend)
            .unwrap_or_default()
    }
}

/// Campaign registration status change.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignEvent {
    pub event_type: String,
    pub account_sid: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_status: Option<String>,
    /// The event's `data` object, kept verbatim.
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationEvent {
    BrandRegistration(BrandEvent),
    CampaignRegistration(CampaignEvent),
    Unrecognized {
        event_type: Option<String>,
        account_sid: Option<String>,
    },
}

impl RegistrationEvent {
    /// Classify a single raw event.
    pub fn classify(raw: &Value) -> Self {
        let data = raw.get("data").unwrap_or(&Value::Null);
        let event_type = text(data, &["type"]).or_else(|| text(raw, &["type"]));
        let account_sid = text(data, &["accountsid", "accountSid", "account_sid"]);

        let Some(event_type) = event_type else {
            return Self::Unrecognized {
                event_type: None,
                account_sid,
            };
        };
        let kind = event_type.strip_prefix(TYPE_PREFIX).unwrap_or(&event_type);

        if kind.starts_with("brand-registration.") {
            Self::BrandRegistration(BrandEvent {
                account_sid,
                brand_registration_id: text(data, &["brandsid", "brandSid", "brand_sid"]),
                raw_status: text(data, &["brandstatus", "brandStatus", "brand_status"]),
                identity_status: text(data, &["identitystatus", "identityStatus", "identity_status"]),
                errors: brand_errors(data),
                event_type,
            })
        } else if kind.starts_with("campaign-registration.") {
            Self::CampaignRegistration(CampaignEvent {
                account_sid,
                campaign_id: text(data, &["campaignsid", "campaignSid", "campaign_sid"]),
                campaign_status: text(data, &["campaignstatus", "campaignStatus", "campaign_status"]),
                payload: data.clone(),
                event_type,
            })
        } else {
            Self::Unrecognized {
                event_type: Some(event_type),
                account_sid,
            }
        }
    }

    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::BrandRegistration(e) => Some(&e.event_type),
            Self::CampaignRegistration(e) => Some(&e.event_type),
            Self::Unrecognized { event_type, .. } => event_type.as_deref(),
        }
    }

    pub fn account_sid(&self) -> Option<&str> {
        match self {
            Self::BrandRegistration(e) => e.account_sid.as_deref(),
            Self::CampaignRegistration(e) => e.account_sid.as_deref(),
            Self::Unrecognized { account_sid, .. } => account_sid.as_deref(),
        }
    }
}

/// First non-blank string value among `keys`.
fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Errors come either as an `errors` list (objects or bare strings) or as a
/// single `failurereason` string.
fn brand_errors(data: &Value) -> Vec<BrandStatusError> {
    let mut errors = Vec::new();
    if let Some(list) = data.get("errors").and_then(Value::as_array) {
        for item in list {
            let error = match item {
                Value::String(s) => Some(BrandStatusError {
                    code: None,
                    description: s.trim().to_string(),
                    field: None,
                }),
                Value::Object(_) => text(item, &["description", "message"]).map(|description| {
                    BrandStatusError {
                        code: item.get("code").and_then(|c| match c {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        }),
                        description,
                        field: text(item, &["field", "fields"]),
                    }
                }),
                _ => None,
            };
            errors.extend(error.filter(|e| !e.description.is_empty()));
        }
    }
    if let Some(reason) = text(data, &["failurereason", "failureReason", "failure_reason"]) {
        errors.push(BrandStatusError {
            code: None,
            description: reason,
            field: None,
        });
    }
    errors
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn single_and_batch_envelopes() {
        let single = Envelope::parse(br#"{"data":{"type":"x"}}"#).unwrap();
        assert_eq!(single.into_events().len(), 1);

        let batch = Envelope::parse(br#"[{"data":{}},{"data":{}}]"#).unwrap();
        assert_eq!(batch.into_events().len(), 2);

        assert!(matches!(
            Envelope::parse(b"{not json"),
            Err(WebhookError::Unparsable(_))
        ));
    }

    #[test]
    fn classifies_prefixed_brand_event() {
        let raw = json!({"data": {
            "type": "com.twilio.messaging.compliance.brand-registration.brand-registered",
            "accountsid": "AC1",
            "brandsid": "BN1",
            "brandstatus": "registered",
            "identitystatus": "VERIFIED"
        }});
        match RegistrationEvent::classify(&raw) {
            RegistrationEvent::BrandRegistration(e) => {
                assert_eq!(e.account_sid.as_deref(), Some("AC1"));
                assert_eq!(e.brand_registration_id.as_deref(), Some("BN1"));
                assert_eq!(e.brand_status(), BrandStatus::Verified);
                assert_eq!(e.identity_status.as_deref(), Some("VERIFIED"));
                assert!(e.errors.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classifies_unprefixed_campaign_event_and_keeps_payload() {
        let raw = json!({"data": {
            "type": "campaign-registration.campaign-submitted",
            "accountsid": "AC1",
            "campaignsid": "QE1",
            "campaignstatus": "PENDING"
        }});
        match RegistrationEvent::classify(&raw) {
            RegistrationEvent::CampaignRegistration(e) => {
                assert_eq!(e.campaign_status.as_deref(), Some("PENDING"));
                assert_eq!(e.payload["campaignsid"], "QE1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn top_level_type_is_accepted() {
        let raw = json!({
            "type": "com.twilio.messaging.compliance.brand-registration.brand-failure",
            "data": {"accountsid": "AC1", "brandstatus": "failed"}
        });
        let event = RegistrationEvent::classify(&raw);
        assert!(matches!(event, RegistrationEvent::BrandRegistration(_)));
        assert_eq!(event.account_sid(), Some("AC1"));
    }

    #[test]
    fn unknown_or_missing_type_is_unrecognized() {
        let raw = json!({"data": {"type": "billing.invoice-paid", "accountsid": "AC1"}});
        let event = RegistrationEvent::classify(&raw);
        assert_eq!(
            event,
            RegistrationEvent::Unrecognized {
                event_type: Some("billing.invoice-paid".into()),
                account_sid: Some("AC1".into()),
            }
        );

        let event = RegistrationEvent::classify(&json!("just a string"));
        assert_eq!(event.event_type(), None);
    }

    #[test]
    fn brand_errors_from_list_and_reason() {
        let raw = json!({"data": {
            "type": "brand-registration.brand-unverified",
            "accountsid": "AC1",
            "brandstatus": "failed",
            "errors": [
                {"code": 30794, "description": "EIN does not match", "fields": "ein"},
                "Website unreachable",
                {"code": "x"},
                7
            ],
            "failurereason": "Identity could not be verified"
        }});
        let RegistrationEvent::BrandRegistration(e) = RegistrationEvent::classify(&raw) else {
            panic!("expected brand event");
        };
        assert_eq!(e.brand_status(), BrandStatus::Rejected);
        assert_eq!(e.errors.len(), 3);
        assert_eq!(e.errors[0].code.as_deref(), Some("30794"));
        assert_eq!(e.errors[0].field.as_deref(), Some("ein"));
        assert_eq!(e.errors[1].description, "Website unreachable");
        assert_eq!(e.errors[2].description, "Identity could not be verified");
    }
}
