use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use security_cell::{AccessPolicy, AccessTarget, Action};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::identity::CallerIdentity;

use crate::models::{
    DoctorError, Practitioner, PractitionerSearchFilters, UpdateAvailabilityTemplateRequest,
};
use crate::services::availability::{parse_utc_offset, validate_template};

pub struct DoctorService {
    supabase: SupabaseClient,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Look up a practitioner, returning `None` when no row matches.
    pub async fn find_practitioner(
        &self,
        practitioner_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<Practitioner>, DoctorError> {
        debug!("Fetching practitioner: {}", practitioner_id);

        let path = format!("/rest/v1/practitioners?id=eq.{}", practitioner_id);
        let mut rows: Vec<Practitioner> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    pub async fn get_practitioner(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Practitioner, DoctorError> {
        self.find_practitioner(practitioner_id, Some(auth_token))
            .await?
            .ok_or(DoctorError::NotFound)
    }

    /// Active practitioners, optionally filtered by specialty.
    pub async fn list_practitioners(
        &self,
        filters: &PractitionerSearchFilters,
        auth_token: &str,
    ) -> Result<Vec<Practitioner>, DoctorError> {
        let mut query_parts = vec!["is_active=eq.true".to_string()];

        if let Some(specialty) = &filters.specialty {
            query_parts.push(format!("specialty=eq.{}", specialty));
        }
        query_parts.push("order=last_name.asc".to_string());
        if let Some(limit) = filters.limit {
            query_parts.push(format!("limit={}", limit));
        }
        if let Some(offset) = filters.offset {
            query_parts.push(format!("offset={}", offset));
        }

        let path = format!("/rest/v1/practitioners?{}", query_parts.join("&"));
        let practitioners: Vec<Practitioner> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        debug!("Found {} practitioners", practitioners.len());
        Ok(practitioners)
    }

    /// Replace a practitioner's weekly template. Existing appointments are
    /// left as they are.
    pub async fn update_availability_template(
        &self,
        caller: &CallerIdentity,
        practitioner_id: Uuid,
        request: UpdateAvailabilityTemplateRequest,
        auth_token: &str,
    ) -> Result<Practitioner, DoctorError> {
        let decision = AccessPolicy::authorize(
            caller,
            Action::ManagePractitionerProfile,
            &AccessTarget::practitioner(practitioner_id),
        );
        if !decision.is_allowed() {
            return Err(DoctorError::Unauthorized);
        }

        validate_template(&request.availability_template)?;
        if let Some(timezone) = &request.timezone {
            parse_utc_offset(timezone)?;
        }

        let mut update = json!({
            "availability_template": request.availability_template,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(timezone) = request.timezone {
            update["timezone"] = json!(timezone);
        }

        let path = format!("/rest/v1/practitioners?id=eq.{}", practitioner_id);
        let mut rows: Vec<Practitioner> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        if rows.is_empty() {
            warn!("Template update matched no practitioner: {}", practitioner_id);
            return Err(DoctorError::NotFound);
        }

        let practitioner = rows.swap_remove(0);
        info!(
            "Practitioner {} template updated ({} windows) by {}",
            practitioner.id,
            practitioner.availability_template.len(),
            caller.user_id
        );
        Ok(practitioner)
    }
}
