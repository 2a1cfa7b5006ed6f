use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::AppointmentStatus;

// ==============================================================================
// ACCESS POLICY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    RequestAppointment,
    CancelAppointment,
    RescheduleAppointment,
    MarkOutcome,
    ViewSchedule,
    ViewAppointment,
    ViewPatientRecord,
    UpdatePatientRecord,
    ManagePractitionerProfile,
    ViewMedicalRecord,
    ManageMedicalRecord,
    ViewAssignedPatients,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::RequestAppointment => "request_appointment",
            Action::CancelAppointment => "cancel_appointment",
            Action::RescheduleAppointment => "reschedule_appointment",
            Action::MarkOutcome => "mark_outcome",
            Action::ViewSchedule => "view_schedule",
            Action::ViewAppointment => "view_appointment",
            Action::ViewPatientRecord => "view_patient_record",
            Action::UpdatePatientRecord => "update_patient_record",
            Action::ManagePractitionerProfile => "manage_practitioner_profile",
            Action::ViewMedicalRecord => "view_medical_record",
            Action::ManageMedicalRecord => "manage_medical_record",
            Action::ViewAssignedPatients => "view_assigned_patients",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Who owns the record an action touches. `patient_owner` is the user id
/// behind the patient record, not the patient record id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessTarget {
    pub patient_owner: Option<Uuid>,
    pub practitioner: Option<Uuid>,
}

impl AccessTarget {
    pub fn patient(owner: Uuid) -> Self {
        Self {
            patient_owner: Some(owner),
            practitioner: None,
        }
    }

    pub fn practitioner(practitioner_id: Uuid) -> Self {
        Self {
            patient_owner: None,
            practitioner: Some(practitioner_id),
        }
    }

    pub fn appointment(patient_owner: Uuid, practitioner_id: Uuid) -> Self {
        Self {
            patient_owner: Some(patient_owner),
            practitioner: Some(practitioner_id),
        }
    }

    /// A patient's clinical data. `assigned_practitioner` is only set when
    /// the acting practitioner currently has an assignment to the patient.
    pub fn care_team(patient_owner: Uuid, assigned_practitioner: Option<Uuid>) -> Self {
        Self {
            patient_owner: Some(patient_owner),
            practitioner: assigned_practitioner,
        }
    }
}

// ==============================================================================
// AUDIT EVENTS
// ==============================================================================

/// Append-only record of one appointment status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionEvent {
    pub event_id: Uuid,
    pub appointment_id: Uuid,
    pub from_status: Option<AppointmentStatus>,
    pub to_status: AppointmentStatus,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl TransitionEvent {
    pub fn new(
        appointment_id: Uuid,
        from_status: Option<AppointmentStatus>,
        to_status: AppointmentStatus,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            appointment_id,
            from_status,
            to_status,
            actor_id,
            occurred_at,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CareTeamChange {
    Assigned,
    Unassigned,
}

impl fmt::Display for CareTeamChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CareTeamChange::Assigned => f.write_str("assigned"),
            CareTeamChange::Unassigned => f.write_str("unassigned"),
        }
    }
}

/// A practitioner joining or leaving a patient's care team. The assigned
/// practitioner is notified through this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareTeamEvent {
    pub event_id: Uuid,
    pub patient_id: Uuid,
    pub practitioner_id: Uuid,
    pub change: CareTeamChange,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl CareTeamEvent {
    pub fn new(
        patient_id: Uuid,
        practitioner_id: Uuid,
        change: CareTeamChange,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            patient_id,
            practitioner_id,
            change,
            actor_id,
            occurred_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit sink rejected event: {0}")]
    Sink(String),

    #[error("Audit store error: {0}")]
    Database(#[from] DatabaseError),
}
