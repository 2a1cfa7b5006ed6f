use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};
use thiserror::Error;

use shared_database::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    /// Auth user that owns this record.
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPatientRequest {
    /// Only admins may register a record for another user.
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientPractitionerAssignment {
    pub patient_id: Uuid,
    pub practitioner_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

/// Clinical note written by a practitioner on the patient's care team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// None when an admin entered the record.
    pub practitioner_id: Option<Uuid>,
    pub diagnosis: String,
    pub treatment: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecordRequest {
    pub diagnosis: String,
    pub treatment: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMedicalRecordRequest {
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Practitioner not found")]
    PractitionerNotFound,

    #[error("User {0} already has a patient record")]
    AlreadyRegistered(Uuid),

    #[error("Practitioner is already assigned to this patient")]
    AlreadyAssigned,

    #[error("Practitioner was never assigned to this patient")]
    NotAssigned,

    #[error("Medical record not found")]
    RecordNotFound,

    #[error("Patient record is deactivated")]
    Inactive,

    #[error("Unauthorized access to patient data")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
