// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};

pub fn appointment_routes(state: AppointmentState) -> Router {
    Router::new()
        .route("/", post(handlers::request_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/outcome", post(handlers::mark_outcome))
        // Listings
        .route("/availability/{practitioner_id}", get(handlers::get_availability))
        .route(
            "/practitioners/{practitioner_id}/schedule",
            get(handlers::get_practitioner_schedule),
        )
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
