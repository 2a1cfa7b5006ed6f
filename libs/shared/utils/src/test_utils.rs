use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingRules};
use shared_models::auth::User;
use shared_models::identity::{CallerIdentity, Role};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub scheduling: SchedulingRules,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            scheduling: SchedulingRules::default(),
        }
    }
}

impl TestConfig {
    /// Point the config at a mock PostgREST server.
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            bind_address: "127.0.0.1:0".to_string(),
            scheduling: self.scheduling.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn with_id(id: Uuid, role: &str) -> Self {
        Self {
            id,
            email: format!("{}@example.com", role),
            role: role.to_string(),
        }
    }

    pub fn practitioner(email: &str) -> Self {
        Self::new(email, "practitioner")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn to_identity(&self) -> CallerIdentity {
        let role = self.role.parse().unwrap_or(Role::Patient);
        CallerIdentity::new(self.id, role)
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        // Shaped like a Supabase access token: the clinic role travels in app_metadata
        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// PostgREST row shapes for the clinic tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn practitioner_row(practitioner_id: Uuid, specialty: &str) -> serde_json::Value {
        json!({
            "id": practitioner_id,
            "first_name": "Test",
            "last_name": "Practitioner",
            "specialty": specialty,
            "timezone": "UTC",
            "availability_template": [
                { "weekday": "Mon", "start_time": "09:00:00", "end_time": "12:00:00" }
            ],
            "is_active": true,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn patient_row(patient_id: Uuid, user_id: Uuid) -> serde_json::Value {
        json!({
            "id": patient_id,
            "user_id": user_id,
            "first_name": "Test",
            "last_name": "Patient",
            "email": "patient@example.com",
            "phone_number": null,
            "date_of_birth": "1990-01-01",
            "gender": "other",
            "is_active": true,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn appointment_row(
        appointment_id: Uuid,
        practitioner_id: Uuid,
        patient_id: Uuid,
        start_time: &str,
        end_time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "practitioner_id": practitioner_id,
            "patient_id": patient_id,
            "start_time": start_time,
            "end_time": end_time,
            "status": status,
            "booked_by": patient_id,
            "request_token": null,
            "rescheduled_from": null,
            "cancellation_reason": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn assignment_row(patient_id: Uuid, practitioner_id: Uuid) -> serde_json::Value {
        json!({
            "patient_id": patient_id,
            "practitioner_id": practitioner_id,
            "assigned_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn medical_record_row(record_id: Uuid, patient_id: Uuid, practitioner_id: Uuid) -> serde_json::Value {
        json!({
            "id": record_id,
            "patient_id": patient_id,
            "practitioner_id": practitioner_id,
            "diagnosis": "Seasonal allergies",
            "treatment": "Antihistamines",
            "notes": null,
            "recorded_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn error_response(code: &str, message: &str) -> serde_json::Value {
        json!({
            "code": code,
            "message": message,
            "details": null,
            "hint": null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
        assert_eq!(app_config.scheduling.slot_granularity_minutes, 15);
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::practitioner("doc@example.com");
        assert_eq!(user.email, "doc@example.com");
        assert_eq!(user.role, "practitioner");

        let user_model = user.to_user();
        assert_eq!(user_model.email, Some(user.email.clone()));
        assert_eq!(user_model.role, Some(user.role.clone()));
        assert_eq!(user_model.id, user.id.to_string());
        assert_eq!(user.to_identity().role, Role::Practitioner);
    }

    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));

        assert_eq!(token.split('.').count(), 3);
    }
}
