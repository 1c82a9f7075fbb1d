//! Webhook ingestor — applies registration status changes to stored profiles
//! and kicks off the continuation once a brand is verified.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::event::{BrandEvent, CampaignEvent, Envelope, RegistrationEvent};
use crate::error::WebhookError;
use crate::registration::model::{BrandStatus, ExternalIdKind, ProfilePatch, RegistrationProfile};
use crate::registration::orchestrator::{ContinuationOutcome, StepOrchestrator};
use crate::store::RegistrationStore;

/// Source tag for the raw webhook log.
pub const REGISTRATION_SOURCE: &str = "registration";

/// Why an event was acknowledged without changing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    UnrecognizedType,
    MissingAccount,
    UnknownAccount,
    /// Campaign status arrived before the campaign was created.
    CampaignNotCreated,
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventOutcome {
    Applied {
        tenant_id: String,
        event_type: String,
    },
    ContinuationRan {
        tenant_id: String,
        continuation: ContinuationOutcome,
    },
    Ignored {
        event_type: Option<String>,
        reason: IgnoreReason,
    },
    Failed {
        tenant_id: Option<String>,
        error: String,
    },
}

impl EventOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One tenant's result from a reconcile sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileEntry {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ContinuationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct WebhookIngestor {
    store: Arc<dyn RegistrationStore>,
    orchestrator: Arc<StepOrchestrator>,
}

impl WebhookIngestor {
    pub fn new(store: Arc<dyn RegistrationStore>, orchestrator: Arc<StepOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Log the raw delivery, then handle each event it carries in order.
    pub async fn ingest(&self, body: &[u8]) -> Result<Vec<EventOutcome>, WebhookError> {
        let raw = String::from_utf8_lossy(body);
        let log_id = self
            .store
            .append_webhook_event(REGISTRATION_SOURCE, &raw)
            .await
            .map_err(WebhookError::AuditLog)?;

        let events = match Envelope::parse(body) {
            Ok(envelope) => envelope.into_events(),
            Err(e) => {
                warn!(log_id = %log_id, error = %e, "Rejecting unparsable webhook body");
                return Err(e);
            }
        };
        debug!(log_id = %log_id, count = events.len(), "Webhook delivery received");

        let mut outcomes = Vec::with_capacity(events.len());
        for raw_event in &events {
            outcomes.push(self.handle_event(raw_event).await);
        }
        Ok(outcomes)
    }

    pub async fn handle_event(&self, raw: &Value) -> EventOutcome {
        let event = RegistrationEvent::classify(raw);
        let event_type = event.event_type().map(str::to_string);

        if let RegistrationEvent::Unrecognized { .. } = event {
            info!(event_type = ?event_type, "Ignoring unrecognized webhook event");
            return EventOutcome::Ignored {
                event_type,
                reason: IgnoreReason::UnrecognizedType,
            };
        }

        let Some(account_sid) = event.account_sid() else {
            info!(event_type = ?event_type, "Ignoring webhook event without account");
            return EventOutcome::Ignored {
                event_type,
                reason: IgnoreReason::MissingAccount,
            };
        };

        let profile = match self
            .store
            .find_by_external_id(ExternalIdKind::Subaccount, account_sid)
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                info!(account_sid, event_type = ?event_type, "Webhook account does not map to a tenant");
                return EventOutcome::Ignored {
                    event_type,
                    reason: IgnoreReason::UnknownAccount,
                };
            }
            Err(e) => {
                warn!(account_sid, error = %e, "Tenant lookup failed");
                return EventOutcome::Failed {
                    tenant_id: None,
                    error: e.to_string(),
                };
            }
        };

        match event {
            RegistrationEvent::BrandRegistration(brand) => self.apply_brand(profile, brand).await,
            RegistrationEvent::CampaignRegistration(campaign) => {
                self.apply_campaign(profile, campaign).await
            }
            RegistrationEvent::Unrecognized { .. } => EventOutcome::Ignored {
                event_type,
                reason: IgnoreReason::UnrecognizedType,
            },
        }
    }

    async fn apply_brand(&self, profile: RegistrationProfile, event: BrandEvent) -> EventOutcome {
        let tenant_id = profile.tenant_id;
        let status = event.brand_status();
        if status == BrandStatus::Unknown {
            debug!(tenant_id = %tenant_id, raw_status = ?event.raw_status, "Brand status not mapped, keeping stored status");
        }

        let patch = ProfilePatch {
            brand_status: (status != BrandStatus::Unknown).then_some(status),
            identity_status: event.identity_status.clone(),
            brand_status_errors: event.errors.clone(),
            ..Default::default()
        };
        let merged = match self.store.merge_profile(&tenant_id, &patch).await {
            Ok(merged) => merged,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to apply brand event");
                return EventOutcome::Failed {
                    tenant_id: Some(tenant_id),
                    error: e.to_string(),
                };
            }
        };
        if status != BrandStatus::Unknown && merged.brand_status != status {
            info!(
                tenant_id = %tenant_id,
                reported = %status,
                "Brand already verified, stale status not applied"
            );
        }
        info!(
            tenant_id = %tenant_id,
            event_type = %event.event_type,
            brand_status = %merged.brand_status,
            reported_errors = event.errors.len(),
            "Brand event applied"
        );

        if !merged.is_brand_verified() || merged.messaging_service_id.is_some() {
            return EventOutcome::Applied {
                tenant_id,
                event_type: event.event_type,
            };
        }

        match self.orchestrator.resume_continuation(&tenant_id).await {
            Ok(continuation) => EventOutcome::ContinuationRan {
                tenant_id,
                continuation,
            },
            Err(e) => EventOutcome::Failed {
                tenant_id: Some(tenant_id),
                error: e.to_string(),
            },
        }
    }

    async fn apply_campaign(
        &self,
        profile: RegistrationProfile,
        event: CampaignEvent,
    ) -> EventOutcome {
        let tenant_id = profile.tenant_id;
        if profile.campaign_id.is_none() {
            info!(
                tenant_id = %tenant_id,
                event_type = %event.event_type,
                brand_status = %profile.brand_status,
                "Campaign event before campaign exists, ignoring"
            );
            return EventOutcome::Ignored {
                event_type: Some(event.event_type),
                reason: IgnoreReason::CampaignNotCreated,
            };
        }

        let patch = ProfilePatch {
            campaign_status: event.campaign_status.clone(),
            campaign_payload: Some(event.payload),
            ..Default::default()
        };
        match self.store.merge_profile(&tenant_id, &patch).await {
            Ok(_) => {
                info!(tenant_id = %tenant_id, campaign_status = ?event.campaign_status, "Campaign event applied");
                EventOutcome::Applied {
                    tenant_id,
                    event_type: event.event_type,
                }
            }
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to apply campaign event");
                EventOutcome::Failed {
                    tenant_id: Some(tenant_id),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Resume every continuation left stalled by an earlier failure.
    pub async fn reconcile(&self) -> Result<Vec<ReconcileEntry>, WebhookError> {
        let stalled = self
            .store
            .list_stalled_continuations()
            .await?;
        info!(count = stalled.len(), "Reconciling stalled continuations");

        let mut entries = Vec::with_capacity(stalled.len());
        for profile in stalled {
            let entry = match self
                .orchestrator
                .resume_continuation(&profile.tenant_id)
                .await
            {
                Ok(outcome) => ReconcileEntry {
                    tenant_id: profile.tenant_id,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => ReconcileEntry {
                    tenant_id: profile.tenant_id,
                    outcome: None,
                    error: Some(e.to_string()),
                },
            };
            entries.push(entry);
        }
        Ok(entries)
    }
}
