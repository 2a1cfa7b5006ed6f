use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use doctor_cell::Practitioner;
use patient_cell::Patient;

use crate::models::{Appointment, AppointmentStatus};
use crate::services::conflict::find_conflicts;
use crate::services::store::{SchedulingStore, StoreError};

#[derive(Default)]
struct StoreState {
    practitioners: HashMap<Uuid, Practitioner>,
    patients: HashMap<Uuid, Patient>,
    appointments: HashMap<Uuid, Appointment>,
}

impl StoreState {
    fn token_taken(&self, token: Option<&str>) -> bool {
        token.is_some_and(|token| {
            self.appointments
                .values()
                .any(|appointment| appointment.request_token.as_deref() == Some(token))
        })
    }

    fn check_insertable(&self, candidate: &Appointment, exclude: Option<Uuid>) -> Result<(), StoreError> {
        if self.token_taken(candidate.request_token.as_deref()) {
            return Err(StoreError::DuplicateRequestToken);
        }

        let conflicts = find_conflicts(
            candidate.practitioner_id,
            candidate.start_time,
            candidate.end_time,
            self.appointments.values(),
            exclude,
        );
        if !conflicts.is_empty() {
            return Err(StoreError::Conflict);
        }

        Ok(())
    }
}

/// Scheduling store held in process memory.
///
/// Every operation runs under one mutex, so a check and the write that
/// depends on it can never interleave with another writer.
#[derive(Default)]
pub struct InMemorySchedulingStore {
    state: Mutex<StoreState>,
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_practitioner(&self, practitioner: Practitioner) {
        self.state.lock().await.practitioners.insert(practitioner.id, practitioner);
    }

    pub async fn add_patient(&self, patient: Patient) {
        self.state.lock().await.patients.insert(patient.id, patient);
    }

    /// Seed an appointment as-is, skipping every check.
    pub async fn put_appointment(&self, appointment: Appointment) {
        self.state.lock().await.appointments.insert(appointment.id, appointment);
    }

    pub async fn appointments(&self) -> Vec<Appointment> {
        let mut appointments: Vec<Appointment> =
            self.state.lock().await.appointments.values().cloned().collect();
        appointments.sort_by_key(|appointment| appointment.start_time);
        appointments
    }
}

#[async_trait]
impl SchedulingStore for InMemorySchedulingStore {
    async fn find_practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, StoreError> {
        Ok(self.state.lock().await.practitioners.get(&practitioner_id).cloned())
    }

    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, StoreError> {
        Ok(self.state.lock().await.patients.get(&patient_id).cloned())
    }

    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.state.lock().await.appointments.get(&appointment_id).cloned())
    }

    async fn find_by_request_token(&self, request_token: &str) -> Result<Option<Appointment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .appointments
            .values()
            .find(|appointment| appointment.request_token.as_deref() == Some(request_token))
            .cloned())
    }

    async fn list_commitments(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        let mut commitments: Vec<Appointment> =
            find_conflicts(practitioner_id, from, to, state.appointments.values(), exclude)
                .into_iter()
                .cloned()
                .collect();
        commitments.sort_by_key(|appointment| appointment.start_time);
        Ok(commitments)
    }

    async fn list_practitioner_appointments(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        let mut appointments: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|appointment| appointment.practitioner_id == practitioner_id)
            .filter(|appointment| appointment.start_time >= from && appointment.start_time < to)
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| appointment.start_time);
        Ok(appointments)
    }

    async fn list_patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, StoreError> {
        let state = self.state.lock().await;
        let mut appointments: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|appointment| appointment.patient_id == patient_id)
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| appointment.start_time);
        Ok(appointments)
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut state = self.state.lock().await;
        state.check_insertable(appointment, None)?;
        state.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn transition_status(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        next: AppointmentStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        let mut state = self.state.lock().await;
        let appointment = state
            .appointments
            .get_mut(&appointment_id)
            .ok_or(StoreError::NotFound)?;

        if appointment.status != expected {
            return Err(StoreError::StaleWrite);
        }

        appointment.status = next;
        appointment.updated_at = at;
        if next == AppointmentStatus::Cancelled {
            appointment.cancellation_reason = reason.map(str::to_string);
        }

        Ok(appointment.clone())
    }

    async fn reschedule(
        &self,
        original_id: Uuid,
        expected: AppointmentStatus,
        reason: Option<&str>,
        replacement: &Appointment,
    ) -> Result<(Appointment, Appointment), StoreError> {
        let mut state = self.state.lock().await;

        let original = state
            .appointments
            .get(&original_id)
            .ok_or(StoreError::NotFound)?;
        if original.status != expected {
            return Err(StoreError::StaleWrite);
        }

        // Validate everything before touching anything
        state.check_insertable(replacement, Some(original_id))?;

        let mut cancelled = original.clone();
        cancelled.status = AppointmentStatus::Cancelled;
        cancelled.cancellation_reason = reason.map(str::to_string);
        cancelled.updated_at = replacement.created_at;

        state.appointments.insert(cancelled.id, cancelled.clone());
        state.appointments.insert(replacement.id, replacement.clone());

        Ok((cancelled, replacement.clone()))
    }
}
