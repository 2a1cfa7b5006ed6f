use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::caller_identity;

use crate::models::{DoctorError, PractitionerSearchFilters, UpdateAvailabilityTemplateRequest};
use crate::services::doctor::DoctorService;

impl From<DoctorError> for AppError {
    fn from(e: DoctorError) -> Self {
        match e {
            DoctorError::NotFound => AppError::NotFound(e.to_string()),
            DoctorError::Unauthorized => AppError::Forbidden(e.to_string()),
            DoctorError::Availability(inner) => AppError::ValidationError(inner.to_string()),
            DoctorError::Database(inner) if inner.is_transient() => {
                AppError::ServiceUnavailable(inner.to_string())
            }
            DoctorError::Database(inner) => AppError::Database(inner.to_string()),
            DoctorError::Decode(msg) => AppError::Internal(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn list_practitioners(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(filters): Query<PractitionerSearchFilters>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);

    let practitioners = doctor_service.list_practitioners(&filters, auth.token()).await?;

    Ok(Json(json!({
        "practitioners": practitioners,
        "total": practitioners.len()
    })))
}

#[axum::debug_handler]
pub async fn get_practitioner(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(practitioner_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let doctor_service = DoctorService::new(&state);

    let practitioner = doctor_service.get_practitioner(practitioner_id, auth.token()).await?;

    Ok(Json(json!(practitioner)))
}

#[axum::debug_handler]
pub async fn update_availability_template(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(practitioner_id): Path<Uuid>,
    Json(request): Json<UpdateAvailabilityTemplateRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_identity(&user)?;
    let doctor_service = DoctorService::new(&state);

    let practitioner = doctor_service
        .update_availability_template(&caller, practitioner_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "practitioner": practitioner,
        "message": "Availability template updated"
    })))
}
