// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use doctor_cell::TimeInterval;
pub use shared_models::AppointmentStatus;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    /// User who made the booking.
    pub booked_by: Uuid,
    pub request_token: Option<String>,
    pub rescheduled_from: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_time, self.end_time)
    }

    pub fn is_commitment(&self) -> bool {
        self.status.is_commitment()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Idempotency key. Retrying with the same key returns the original booking.
    #[serde(default)]
    pub request_token: Option<String>,
    /// Admin-only: book outside the practitioner's weekly template.
    #[serde(default)]
    pub override_template: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: Option<String>,
    #[serde(default)]
    pub override_template: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    NoShow,
}

impl Outcome {
    pub fn status(&self) -> AppointmentStatus {
        match self {
            Outcome::Completed => AppointmentStatus::Completed,
            Outcome::NoShow => AppointmentStatus::NoShow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkOutcomeRequest {
    pub outcome: Outcome,
}

/// Result of a reschedule: the original, now cancelled, and its replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduledAppointment {
    pub cancelled: Appointment,
    pub replacement: Appointment,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Invalid appointment interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Requested time is not available")]
    SlotUnavailable,

    #[error("Not allowed to perform this action")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Appointment is already {0}")]
    AlreadyTerminal(AppointmentStatus),

    #[error("Appointment has not started yet")]
    TooEarly,

    #[error("Too late: {0}")]
    TooLate(String),

    #[error("Temporary failure, retry later: {0}")]
    TransientFailure(String),

    #[error("Scheduling store error: {0}")]
    StoreFailure(String),
}

impl AppointmentError {
    /// Only transient failures are safe to retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppointmentError::TransientFailure(_))
    }
}
