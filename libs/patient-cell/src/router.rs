use std::sync::Arc;
use axum::{middleware, routing::{get, post, put}, Router};
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

pub fn create_patient_router(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(register_patient))
        .route("/me", get(get_my_patient_record))
        .route("/{id}", get(get_patient).put(update_patient))
        .route("/{id}/deactivate", post(deactivate_patient))
        .route("/{id}/practitioners", get(list_assigned_practitioners))
        .route(
            "/{id}/practitioners/{practitioner_id}",
            post(assign_practitioner).delete(unassign_practitioner),
        )
        .route("/{id}/medical-records", get(list_medical_records).post(create_medical_record))
        .route(
            "/{id}/medical-records/{record_id}",
            put(update_medical_record).delete(delete_medical_record),
        )
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .with_state(config)
}

/// Mounted under `/doctors` next to the practitioner routes.
pub fn assigned_patient_routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/{practitioner_id}/assigned-patients", get(list_assigned_patients))
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .with_state(config)
}
