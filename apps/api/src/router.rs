use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, AppointmentState};
use doctor_cell::router::doctor_routes;
use patient_cell::{assigned_patient_routes, create_patient_router};
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/appointments", appointment_routes(AppointmentState::supabase(state.clone())))
        .nest(
            "/doctors",
            doctor_routes(state.clone()).merge(assigned_patient_routes(state.clone())),
        )
        .nest("/patients", create_patient_router(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use shared_utils::test_utils::TestConfig;
    use tower::ServiceExt;

    #[tokio::test]
    async fn root_answers_without_auth() {
        let app = create_router(TestConfig::default().to_arc());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cell_routes_require_a_token() {
        for uri in [
            "/appointments/patients/00000000-0000-0000-0000-000000000000",
            "/doctors",
            "/doctors/00000000-0000-0000-0000-000000000000/assigned-patients",
            "/patients/me",
        ] {
            let app = create_router(TestConfig::default().to_arc());
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
