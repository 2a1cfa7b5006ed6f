use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use doctor_cell::{DoctorError, DoctorService, Practitioner};
use patient_cell::{Patient, PatientError, PatientService};
use shared_config::AppConfig;
use shared_database::supabase::{
    DatabaseError, SupabaseClient, EXCLUSION_VIOLATION, NO_DATA_FOUND, UNIQUE_VIOLATION,
};

use crate::models::{Appointment, AppointmentStatus};
use crate::services::store::{SchedulingStore, StoreError};

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        match e.sqlstate() {
            Some(EXCLUSION_VIOLATION) => StoreError::Conflict,
            Some(UNIQUE_VIOLATION) => StoreError::DuplicateRequestToken,
            Some(NO_DATA_FOUND) => StoreError::StaleWrite,
            _ if e.is_transient() => StoreError::Timeout(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

fn from_doctor_error(e: DoctorError) -> StoreError {
    match e {
        DoctorError::Database(inner) => inner.into(),
        other => StoreError::Backend(other.to_string()),
    }
}

fn from_patient_error(e: PatientError) -> StoreError {
    match e {
        PatientError::Database(inner) => inner.into(),
        other => StoreError::Backend(other.to_string()),
    }
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Deserialize)]
struct RescheduleResult {
    cancelled: Appointment,
    replacement: Appointment,
}

/// Scheduling store over PostgREST. Writes that must be atomic go through
/// the `book_appointment` and `reschedule_appointment` SQL functions, where
/// the `appointments_no_overlap` exclusion constraint has the final word.
pub struct SupabaseSchedulingStore {
    supabase: SupabaseClient,
    doctors: DoctorService,
    patients: PatientService,
    auth_token: Option<String>,
}

impl SupabaseSchedulingStore {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            doctors: DoctorService::new(config),
            patients: PatientService::new(config),
            auth_token,
        }
    }

    fn token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    async fn query_appointments(&self, path: &str) -> Result<Vec<Appointment>, StoreError> {
        let appointments: Vec<Appointment> = self
            .supabase
            .request(Method::GET, path, self.token(), None)
            .await?;
        Ok(appointments)
    }
}

#[async_trait]
impl SchedulingStore for SupabaseSchedulingStore {
    async fn find_practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, StoreError> {
        self.doctors
            .find_practitioner(practitioner_id, self.token())
            .await
            .map_err(from_doctor_error)
    }

    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, StoreError> {
        self.patients
            .find_patient(patient_id, self.token())
            .await
            .map_err(from_patient_error)
    }

    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        Ok(self.query_appointments(&path).await?.into_iter().next())
    }

    async fn find_by_request_token(&self, request_token: &str) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?request_token=eq.{}",
            urlencoding::encode(request_token)
        );
        Ok(self.query_appointments(&path).await?.into_iter().next())
    }

    async fn list_commitments(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut path = format!(
            "/rest/v1/appointments?practitioner_id=eq.{}&status=in.(requested,confirmed)&start_time=lt.{}&end_time=gt.{}&order=start_time.asc",
            practitioner_id,
            timestamp(to),
            timestamp(from)
        );
        if let Some(excluded) = exclude {
            path.push_str(&format!("&id=neq.{}", excluded));
        }

        let commitments = self.query_appointments(&path).await?;
        debug!("Practitioner {} has {} commitments in window", practitioner_id, commitments.len());
        Ok(commitments)
    }

    async fn list_practitioner_appointments(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?practitioner_id=eq.{}&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            practitioner_id,
            timestamp(from),
            timestamp(to)
        );
        self.query_appointments(&path).await
    }

    async fn list_patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=start_time.asc",
            patient_id
        );
        self.query_appointments(&path).await
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let args = json!({ "p_appointment": appointment });

        let inserted: Appointment = self
            .supabase
            .rpc("book_appointment", self.token(), args)
            .await
            .map_err(|e| {
                warn!("book_appointment failed for {}: {}", appointment.id, e);
                StoreError::from(e)
            })?;

        Ok(inserted)
    }

    async fn transition_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        next: AppointmentStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        let mut update = json!({
            "status": next,
            "updated_at": timestamp(at),
        });
        if next == AppointmentStatus::Cancelled {
            update["cancellation_reason"] = json!(reason);
        }

        // Filtering on the expected status makes the PATCH a compare-and-set
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id, expected
        );
        let updated: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                self.token(),
                Some(update),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        match updated.into_iter().next() {
            Some(appointment) => Ok(appointment),
            None => match self.find_appointment(appointment_id).await? {
                Some(_) => Err(StoreError::StaleWrite),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn reschedule(
        &self,
        original_id: Uuid,
        expected: AppointmentStatus,
        reason: Option<&str>,
        replacement: &Appointment,
    ) -> Result<(Appointment, Appointment), StoreError> {
        let args = json!({
            "p_original_id": original_id,
            "p_expected_status": expected,
            "p_reason": reason,
            "p_replacement": replacement,
        });

        let result: RescheduleResult = self
            .supabase
            .rpc("reschedule_appointment", self.token(), args)
            .await
            .map_err(|e| {
                warn!("reschedule_appointment failed for {}: {}", original_id, e);
                StoreError::from(e)
            })?;

        Ok((result.cancelled, result.replacement))
    }
}
