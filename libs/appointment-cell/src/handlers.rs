// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use security_cell::{AuditService, InMemoryAuditSink, SupabaseAuditSink};
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::clock::{Clock, SystemClock};
use shared_utils::extractor::caller_identity;

use crate::models::{
    AppointmentError, AppointmentRequest, AvailabilityQuery, CancelAppointmentRequest,
    MarkOutcomeRequest, RescheduleAppointmentRequest, ScheduleQuery,
};
use crate::services::booking::SchedulingEngine;
use crate::services::memory_store::InMemorySchedulingStore;
use crate::services::supabase_store::SupabaseSchedulingStore;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::InvalidInterval(_)
            | AppointmentError::InvalidRange(_)
            | AppointmentError::InvalidRequest(_) => AppError::ValidationError(e.to_string()),
            AppointmentError::SlotUnavailable
            | AppointmentError::AlreadyTerminal(_)
            | AppointmentError::TooEarly
            | AppointmentError::TooLate(_) => AppError::Conflict(e.to_string()),
            AppointmentError::Unauthorized => AppError::Forbidden(e.to_string()),
            AppointmentError::NotFound(_) => AppError::NotFound(e.to_string()),
            AppointmentError::TransientFailure(_) => AppError::ServiceUnavailable(e.to_string()),
            AppointmentError::StoreFailure(_) => AppError::Internal(e.to_string()),
        }
    }
}

// ==============================================================================
// STATE
// ==============================================================================

/// Where appointments and transition events are kept.
#[derive(Clone)]
pub enum Backend {
    /// PostgREST, acting with the caller's token.
    Supabase,
    InMemory {
        store: Arc<InMemorySchedulingStore>,
        audit: Arc<InMemoryAuditSink>,
    },
}

#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub backend: Backend,
}

impl AppointmentState {
    pub fn supabase(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            backend: Backend::Supabase,
        }
    }

    pub fn in_memory(
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
        store: Arc<InMemorySchedulingStore>,
        audit: Arc<InMemoryAuditSink>,
    ) -> Self {
        Self {
            config,
            clock,
            backend: Backend::InMemory { store, audit },
        }
    }

    /// Engine bound to one request's credentials.
    pub fn engine(&self, auth_token: &str) -> SchedulingEngine {
        let rules = self.config.scheduling.clone();
        match &self.backend {
            Backend::Supabase => SchedulingEngine::new(
                Arc::new(SupabaseSchedulingStore::new(&self.config, Some(auth_token.to_string()))),
                AuditService::new(Arc::new(SupabaseAuditSink::new(
                    &self.config,
                    Some(auth_token.to_string()),
                ))),
                self.clock.clone(),
                rules,
            ),
            Backend::InMemory { store, audit } => SchedulingEngine::new(
                store.clone(),
                AuditService::new(audit.clone()),
                self.clock.clone(),
                rules,
            ),
        }
    }
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(None),
        Some(value) => {
            let key = value
                .to_str()
                .map_err(|_| AppError::BadRequest("Invalid Idempotency-Key header".to_string()))?
                .trim();
            if key.is_empty() {
                return Err(AppError::BadRequest("Empty Idempotency-Key header".to_string()));
            }
            Ok(Some(key.to_string()))
        }
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn request_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(mut request): Json<AppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let caller = caller_identity(&user)?;

    if let Some(key) = idempotency_key(&headers)? {
        if request.request_token.as_deref().is_some_and(|token| token != key) {
            warn!("Idempotency-Key header disagrees with request_token");
            return Err(AppError::BadRequest(
                "Idempotency-Key header does not match request_token".to_string(),
            ));
        }
        request.request_token = Some(key);
    }

    let appointment = state
        .engine(auth.token())
        .request_appointment(&caller, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment confirmed"
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;

    let appointment = state
        .engine(auth.token())
        .get_appointment(&caller, appointment_id)
        .await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;

    let appointment = state
        .engine(auth.token())
        .cancel_appointment(&caller, appointment_id, request.reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;

    let rescheduled = state
        .engine(auth.token())
        .reschedule_appointment(&caller, appointment_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "cancelled": rescheduled.cancelled,
        "appointment": rescheduled.replacement,
        "message": "Appointment rescheduled"
    })))
}

#[axum::debug_handler]
pub async fn mark_outcome(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<MarkOutcomeRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;

    let appointment = state
        .engine(auth.token())
        .mark_outcome(&caller, appointment_id, request.outcome)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// QUERY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(practitioner_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .engine(auth.token())
        .get_availability(practitioner_id, query.from, query.to)
        .await?;

    Ok(Json(json!({
        "practitioner_id": practitioner_id,
        "from": query.from,
        "to": query.to,
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn get_practitioner_schedule(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(practitioner_id): Path<Uuid>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;

    let appointments = state
        .engine(auth.token())
        .practitioner_schedule(&caller, practitioner_id, query.from, query.to)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;

    let appointments = state
        .engine(auth.token())
        .patient_appointments(&caller, patient_id)
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}
