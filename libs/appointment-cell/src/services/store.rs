use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use doctor_cell::Practitioner;
use patient_cell::Patient;

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    /// The write would overlap a commitment of the same practitioner.
    #[error("Interval overlaps an existing commitment")]
    Conflict,

    #[error("Request token already used")]
    DuplicateRequestToken,

    /// Compare-and-set lost: the row is no longer in the expected status.
    #[error("Appointment changed concurrently")]
    StaleWrite,

    #[error("Record not found")]
    NotFound,

    #[error("Store timed out: {0}")]
    Timeout(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AppointmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => AppointmentError::SlotUnavailable,
            StoreError::DuplicateRequestToken => {
                AppointmentError::InvalidRequest("request token already used".to_string())
            }
            StoreError::StaleWrite => {
                AppointmentError::TransientFailure("appointment changed concurrently".to_string())
            }
            StoreError::NotFound => AppointmentError::NotFound("Appointment"),
            StoreError::Timeout(msg) => AppointmentError::TransientFailure(msg),
            StoreError::Backend(msg) => AppointmentError::StoreFailure(msg),
        }
    }
}

/// Persistence for the scheduling engine.
///
/// Implementations must make `insert_appointment` and `reschedule` atomic
/// with respect to the no-overlap rule: two concurrent writes for the same
/// practitioner whose intervals intersect can never both succeed.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn find_practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, StoreError>;

    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, StoreError>;

    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn find_by_request_token(&self, request_token: &str) -> Result<Option<Appointment>, StoreError>;

    /// Requested/Confirmed appointments of a practitioner intersecting `[from, to)`.
    async fn list_commitments(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Appointments of any status starting in `[from, to)`, ordered by start.
    async fn list_practitioner_appointments(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn list_patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, StoreError>;

    /// Insert after re-checking overlap and token uniqueness in the same
    /// transaction.
    async fn insert_appointment(&self, appointment: &Appointment) -> Result<Appointment, StoreError>;

    /// Move an appointment from `expected` to `next`. Fails with `StaleWrite`
    /// if the current status is not `expected`.
    async fn transition_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        next: AppointmentStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError>;

    /// Cancel `original_id` and insert `replacement` as one unit. On any
    /// error neither change is visible.
    async fn reschedule(
        &self,
        original_id: Uuid,
        expected: AppointmentStatus,
        reason: Option<&str>,
        replacement: &Appointment,
    ) -> Result<(Appointment, Appointment), StoreError>;
}
