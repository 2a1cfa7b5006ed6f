use std::sync::Arc;
use axum::{
    extract::{Path, State, Extension},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::caller_identity;

use security_cell::{AuditService, SupabaseAuditSink};

use crate::models::{
    MedicalRecordRequest, PatientError, RegisterPatientRequest, UpdateMedicalRecordRequest,
    UpdatePatientRequest,
};
use crate::services::PatientService;

impl From<PatientError> for AppError {
    fn from(e: PatientError) -> Self {
        match e {
            PatientError::NotFound
            | PatientError::PractitionerNotFound
            | PatientError::NotAssigned
            | PatientError::RecordNotFound => AppError::NotFound(e.to_string()),
            PatientError::Unauthorized => AppError::Forbidden(e.to_string()),
            PatientError::AlreadyRegistered(_)
            | PatientError::AlreadyAssigned
            | PatientError::Inactive => AppError::Conflict(e.to_string()),
            PatientError::ValidationError(msg) => AppError::ValidationError(msg),
            PatientError::Database(inner) if inner.is_transient() => {
                AppError::ServiceUnavailable(inner.to_string())
            }
            PatientError::Database(inner) => AppError::Database(inner.to_string()),
        }
    }
}

/// Care team events are written with the caller's token.
fn care_team_service(config: &AppConfig, auth_token: &str) -> PatientService {
    let sink = SupabaseAuditSink::new(config, Some(auth_token.to_string()));
    PatientService::new(config).with_audit(AuditService::new(Arc::new(sink)))
}

#[axum::debug_handler]
pub async fn register_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RegisterPatientRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let patient = service.register_patient(&caller, request, auth.token()).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "patient": patient
    }))))
}

#[axum::debug_handler]
pub async fn get_my_patient_record(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let patient = service
        .find_patient_by_user(caller.user_id, Some(auth.token()))
        .await?
        .ok_or(PatientError::NotFound)?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let patient = service.get_patient(&caller, patient_id, auth.token()).await?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn update_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let patient = service.update_patient(&caller, patient_id, request, auth.token()).await?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn deactivate_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let patient = service.deactivate_patient(&caller, patient_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "patient": patient
    })))
}

#[axum::debug_handler]
pub async fn assign_practitioner(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, practitioner_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = care_team_service(&config, auth.token());

    let assignment = service
        .assign_practitioner(&caller, patient_id, practitioner_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "assignment": assignment
    })))
}

#[axum::debug_handler]
pub async fn unassign_practitioner(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, practitioner_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = care_team_service(&config, auth.token());

    service
        .unassign_practitioner(&caller, patient_id, practitioner_id, auth.token())
        .await?;

    Ok(Json(json!({ "success": true })))
}

#[axum::debug_handler]
pub async fn list_assigned_practitioners(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let assignments = service
        .list_assigned_practitioners(&caller, patient_id, auth.token())
        .await?;

    Ok(Json(json!({
        "assignments": assignments,
        "total": assignments.len()
    })))
}

#[axum::debug_handler]
pub async fn list_assigned_patients(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(practitioner_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let patients = service
        .list_assigned_patients(&caller, practitioner_id, auth.token())
        .await?;

    Ok(Json(json!({
        "patients": patients,
        "total": patients.len()
    })))
}

// ==============================================================================
// MEDICAL RECORDS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_medical_records(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let records = service.list_medical_records(&caller, patient_id, auth.token()).await?;

    Ok(Json(json!({
        "records": records,
        "total": records.len()
    })))
}

#[axum::debug_handler]
pub async fn create_medical_record(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<MedicalRecordRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let record = service
        .create_medical_record(&caller, patient_id, request, auth.token())
        .await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "record": record
    }))))
}

#[axum::debug_handler]
pub async fn update_medical_record(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, record_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateMedicalRecordRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    let record = service
        .update_medical_record(&caller, patient_id, record_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "record": record
    })))
}

#[axum::debug_handler]
pub async fn delete_medical_record(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((patient_id, record_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let service = PatientService::new(&config);

    service
        .delete_medical_record(&caller, patient_id, record_id, auth.token())
        .await?;

    Ok(Json(json!({ "success": true })))
}
