// =====================================================================================
// AUDIT SERVICE - APPOINTMENT TRANSITIONS & CARE TEAM CHANGES
// =====================================================================================

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::{error, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AuditError, CareTeamEvent, TransitionEvent};

/// Destination for audit events. Implementations only append.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &TransitionEvent) -> Result<(), AuditError>;

    async fn append_care_team(&self, event: &CareTeamEvent) -> Result<(), AuditError>;
}

/// Writes events to the `appointment_events` and `care_team_events` tables.
pub struct SupabaseAuditSink {
    supabase: SupabaseClient,
    auth_token: Option<String>,
}

impl SupabaseAuditSink {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token,
        }
    }

    async fn insert<T: serde::Serialize + Sync>(&self, table_path: &str, event: &T) -> Result<(), AuditError> {
        let body = serde_json::to_value(event).map_err(|e| AuditError::Sink(e.to_string()))?;

        self.supabase
            .execute(Method::POST, table_path, self.auth_token.as_deref(), Some(body))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for SupabaseAuditSink {
    async fn append(&self, event: &TransitionEvent) -> Result<(), AuditError> {
        self.insert("/rest/v1/appointment_events", event).await
    }

    async fn append_care_team(&self, event: &CareTeamEvent) -> Result<(), AuditError> {
        self.insert("/rest/v1/care_team_events", event).await
    }
}

/// Keeps events in memory. Used by local runs and tests.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<TransitionEvent>>,
    care_team_events: RwLock<Vec<CareTeamEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<TransitionEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, appointment_id: Uuid) -> Vec<TransitionEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.appointment_id == appointment_id)
            .cloned()
            .collect()
    }

    pub async fn care_team_events(&self) -> Vec<CareTeamEvent> {
        self.care_team_events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: &TransitionEvent) -> Result<(), AuditError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn append_care_team(&self, event: &CareTeamEvent) -> Result<(), AuditError> {
        self.care_team_events.write().await.push(event.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record a committed transition. Sink failures are logged and
    /// swallowed; the transition has already happened.
    #[instrument(skip(self, event), fields(appointment_id = %event.appointment_id))]
    pub async fn emit_transition(&self, event: TransitionEvent) {
        self.log_to_tracing(&event);

        if let Err(e) = self.sink.append(&event).await {
            error!(
                event_id = %event.event_id,
                appointment_id = %event.appointment_id,
                to_status = %event.to_status,
                "Failed to persist transition event: {}", e
            );
        }
    }

    /// Record a committed care team change. Like transitions, a sink
    /// failure never undoes the change.
    #[instrument(skip(self, event), fields(patient_id = %event.patient_id))]
    pub async fn emit_care_team(&self, event: CareTeamEvent) {
        info!(
            event_id = %event.event_id,
            practitioner_id = %event.practitioner_id,
            actor_id = %event.actor_id,
            "AUDIT: practitioner {} {}", event.practitioner_id, event.change
        );

        if let Err(e) = self.sink.append_care_team(&event).await {
            error!(
                event_id = %event.event_id,
                patient_id = %event.patient_id,
                change = %event.change,
                "Failed to persist care team event: {}", e
            );
        }
    }

    fn log_to_tracing(&self, event: &TransitionEvent) {
        let from = event
            .from_status
            .map(|status| status.to_string())
            .unwrap_or_else(|| "none".to_string());

        info!(
            event_id = %event.event_id,
            appointment_id = %event.appointment_id,
            actor_id = %event.actor_id,
            reason = ?event.reason,
            "AUDIT: appointment {} -> {}", from, event.to_status
        );
    }
}
