// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if current_status.is_terminal() {
            warn!("Transition attempted out of terminal status: {} -> {}", current_status, new_status);
            return Err(AppointmentError::AlreadyTerminal(current_status));
        }

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            return Err(AppointmentError::InvalidRequest(format!(
                "cannot move appointment from {} to {}",
                current_status, new_status
            )));
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Requested => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Cancelled,
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::NoShow => vec![],
        }
    }

    /// Cancellation must happen before the start and, for non-admins,
    /// outside the notice period.
    pub fn check_cancellation_window(
        &self,
        scheduled_start_time: DateTime<Utc>,
        current_time: DateTime<Utc>,
        notice_minutes: i64,
        is_admin: bool,
    ) -> Result<(), AppointmentError> {
        if current_time >= scheduled_start_time {
            return Err(AppointmentError::TooLate(
                "appointment has already started".to_string(),
            ));
        }

        if !is_admin && scheduled_start_time - current_time < Duration::minutes(notice_minutes) {
            return Err(AppointmentError::TooLate(format!(
                "cancellation requires {} minutes notice",
                notice_minutes
            )));
        }

        Ok(())
    }

    /// Outcomes can only be recorded once the appointment has started.
    pub fn check_outcome_window(
        &self,
        scheduled_start_time: DateTime<Utc>,
        current_time: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if current_time < scheduled_start_time {
            return Err(AppointmentError::TooEarly);
        }
        Ok(())
    }
}
