// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::services::availability::{compute_available_slots, is_aligned, is_bookable, parse_utc_offset};
use doctor_cell::{AvailabilityError, AvailableSlot, DateRange, Practitioner, TimeInterval};
use patient_cell::Patient;
use security_cell::{AccessPolicy, AccessTarget, Action, AuditService, TransitionEvent};
use shared_config::SchedulingRules;
use shared_models::identity::CallerIdentity;
use shared_utils::clock::Clock;

use crate::models::{
    Appointment, AppointmentError, AppointmentRequest, AppointmentStatus, Outcome,
    RescheduleAppointmentRequest, RescheduledAppointment,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::{SchedulingStore, StoreError};

/// Turns booking requests into committed, non-overlapping appointments and
/// drives every later status change.
///
/// The engine checks availability before writing, but the store decides:
/// a conflict reported at commit time is surfaced as `SlotUnavailable`.
pub struct SchedulingEngine {
    store: Arc<dyn SchedulingStore>,
    audit: AuditService,
    clock: Arc<dyn Clock>,
    rules: SchedulingRules,
    lifecycle: AppointmentLifecycleService,
}

impl SchedulingEngine {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        audit: AuditService,
        clock: Arc<dyn Clock>,
        rules: SchedulingRules,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            rules,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    // ==============================================================================
    // BOOKING
    // ==============================================================================

    #[instrument(skip(self, caller, request), fields(caller = %caller.user_id, practitioner_id = %request.practitioner_id))]
    pub async fn request_appointment(
        &self,
        caller: &CallerIdentity,
        request: AppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let now = self.clock.now();
        let interval = self.validate_interval(request.start_time, request.end_time, now)?;

        let patient = self.load_patient(request.patient_id).await?;
        let practitioner = self.load_practitioner(request.practitioner_id).await?;

        self.authorize(
            caller,
            Action::RequestAppointment,
            AccessTarget::appointment(patient.user_id, practitioner.id),
        )?;

        if let Some(token) = request.request_token.as_deref() {
            if let Some(existing) = self.store.find_by_request_token(token).await? {
                return Self::replay(caller, existing, &request);
            }
        }

        if !patient.is_active || !practitioner.is_active {
            warn!(
                "Booking rejected: patient active={} practitioner active={}",
                patient.is_active, practitioner.is_active
            );
            return Err(AppointmentError::Unauthorized);
        }

        if self.template_override_allowed(caller, request.override_template) {
            info!("Admin {} booking outside template", caller.user_id);
        } else {
            self.ensure_bookable(&practitioner, interval, None).await?;
        }

        let appointment = Appointment {
            id: Uuid::new_v4(),
            practitioner_id: practitioner.id,
            patient_id: patient.id,
            start_time: interval.start,
            end_time: interval.end,
            status: AppointmentStatus::Confirmed,
            booked_by: caller.user_id,
            request_token: request.request_token.clone(),
            rescheduled_from: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let committed = match self.store.insert_appointment(&appointment).await {
            Ok(committed) => committed,
            Err(StoreError::DuplicateRequestToken) => {
                // Lost a race against a retry carrying the same key
                let token = request.request_token.as_deref().unwrap_or_default();
                let winner = self
                    .store
                    .find_by_request_token(token)
                    .await?
                    .ok_or_else(|| {
                        AppointmentError::TransientFailure("request token winner not visible yet".to_string())
                    })?;
                return Self::replay(caller, winner, &request);
            }
            Err(StoreError::Conflict) => {
                warn!("Slot taken at commit for practitioner {}", practitioner.id);
                return Err(AppointmentError::SlotUnavailable);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Appointment {} confirmed for patient {} with practitioner {} at {}",
            committed.id, committed.patient_id, committed.practitioner_id, committed.start_time
        );

        self.audit
            .emit_transition(TransitionEvent::new(
                committed.id,
                Some(AppointmentStatus::Requested),
                AppointmentStatus::Confirmed,
                caller.user_id,
                now,
            ))
            .await;

        Ok(committed)
    }

    /// A retried request returns the original booking only if it asks for
    /// the same thing.
    fn replay(
        caller: &CallerIdentity,
        existing: Appointment,
        request: &AppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let same_request = existing.booked_by == caller.user_id
            && existing.practitioner_id == request.practitioner_id
            && existing.patient_id == request.patient_id
            && existing.start_time == request.start_time
            && existing.end_time == request.end_time;

        if same_request {
            debug!("Replaying appointment {} for repeated request token", existing.id);
            Ok(existing)
        } else {
            warn!("Request token reused with different parameters");
            Err(AppointmentError::InvalidRequest(
                "request token already used for a different booking".to_string(),
            ))
        }
    }

    // ==============================================================================
    // STATUS CHANGES
    // ==============================================================================

    #[instrument(skip(self, caller, reason), fields(caller = %caller.user_id))]
    pub async fn cancel_appointment(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let now = self.clock.now();
        let appointment = self.load_appointment(appointment_id).await?;
        let owner = self.patient_owner(&appointment).await?;

        self.authorize(
            caller,
            Action::CancelAppointment,
            AccessTarget::appointment(owner, appointment.practitioner_id),
        )?;

        self.lifecycle
            .validate_status_transition(appointment.status, AppointmentStatus::Cancelled)?;
        self.lifecycle.check_cancellation_window(
            appointment.start_time,
            now,
            self.rules.min_cancellation_notice_minutes,
            caller.is_admin(),
        )?;

        let cancelled = self
            .commit_transition(&appointment, AppointmentStatus::Cancelled, reason.as_deref(), now)
            .await?;

        info!("Appointment {} cancelled by {}", cancelled.id, caller.user_id);

        self.audit
            .emit_transition(
                TransitionEvent::new(
                    cancelled.id,
                    Some(appointment.status),
                    AppointmentStatus::Cancelled,
                    caller.user_id,
                    now,
                )
                .with_reason(reason),
            )
            .await;

        Ok(cancelled)
    }

    #[instrument(skip(self, caller, request), fields(caller = %caller.user_id))]
    pub async fn reschedule_appointment(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<RescheduledAppointment, AppointmentError> {
        let now = self.clock.now();
        let interval = self.validate_interval(request.start_time, request.end_time, now)?;

        let original = self.load_appointment(appointment_id).await?;
        let owner = self.patient_owner(&original).await?;

        self.authorize(
            caller,
            Action::RescheduleAppointment,
            AccessTarget::appointment(owner, original.practitioner_id),
        )?;

        self.lifecycle
            .validate_status_transition(original.status, AppointmentStatus::Cancelled)?;
        if now >= original.start_time {
            return Err(AppointmentError::TooLate(
                "appointment has already started".to_string(),
            ));
        }

        let practitioner = self.load_practitioner(original.practitioner_id).await?;
        if !practitioner.is_active {
            return Err(AppointmentError::Unauthorized);
        }

        if self.template_override_allowed(caller, request.override_template) {
            info!("Admin {} rescheduling outside template", caller.user_id);
        } else {
            self.ensure_bookable(&practitioner, interval, Some(original.id)).await?;
        }

        let replacement = Appointment {
            id: Uuid::new_v4(),
            practitioner_id: original.practitioner_id,
            patient_id: original.patient_id,
            start_time: interval.start,
            end_time: interval.end,
            status: AppointmentStatus::Confirmed,
            booked_by: caller.user_id,
            request_token: None,
            rescheduled_from: Some(original.id),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let (cancelled, replacement) = match self
            .store
            .reschedule(original.id, original.status, request.reason.as_deref(), &replacement)
            .await
        {
            Ok(pair) => pair,
            Err(StoreError::StaleWrite) => return Err(self.stale_write(original.id).await),
            Err(StoreError::Conflict) => {
                warn!("Reschedule target taken at commit for appointment {}", original.id);
                return Err(AppointmentError::SlotUnavailable);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Appointment {} rescheduled to {} ({} -> {})",
            original.id, replacement.id, replacement.start_time, replacement.end_time
        );

        self.audit
            .emit_transition(
                TransitionEvent::new(
                    cancelled.id,
                    Some(original.status),
                    AppointmentStatus::Cancelled,
                    caller.user_id,
                    now,
                )
                .with_reason(request.reason.clone()),
            )
            .await;
        self.audit
            .emit_transition(
                TransitionEvent::new(
                    replacement.id,
                    Some(AppointmentStatus::Requested),
                    AppointmentStatus::Confirmed,
                    caller.user_id,
                    now,
                )
                .with_reason(Some(format!("rescheduled from {}", original.id))),
            )
            .await;

        Ok(RescheduledAppointment { cancelled, replacement })
    }

    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn mark_outcome(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
        outcome: Outcome,
    ) -> Result<Appointment, AppointmentError> {
        let now = self.clock.now();
        let appointment = self.load_appointment(appointment_id).await?;

        self.lifecycle.check_outcome_window(appointment.start_time, now)?;

        let owner = self.patient_owner(&appointment).await?;
        self.authorize(
            caller,
            Action::MarkOutcome,
            AccessTarget::appointment(owner, appointment.practitioner_id),
        )?;

        let next = outcome.status();
        self.lifecycle.validate_status_transition(appointment.status, next)?;

        let updated = self.commit_transition(&appointment, next, None, now).await?;

        info!("Appointment {} marked {} by {}", updated.id, next, caller.user_id);

        self.audit
            .emit_transition(TransitionEvent::new(
                updated.id,
                Some(appointment.status),
                next,
                caller.user_id,
                now,
            ))
            .await;

        Ok(updated)
    }

    async fn commit_transition(
        &self,
        appointment: &Appointment,
        next: AppointmentStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        match self
            .store
            .transition_status(appointment.id, appointment.status, next, reason, at)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(StoreError::StaleWrite) => Err(self.stale_write(appointment.id).await),
            Err(e) => Err(e.into()),
        }
    }

    /// Someone else changed the row between our read and our write.
    async fn stale_write(&self, appointment_id: Uuid) -> AppointmentError {
        match self.store.find_appointment(appointment_id).await {
            Ok(Some(current)) if current.status.is_terminal() => {
                AppointmentError::AlreadyTerminal(current.status)
            }
            Ok(Some(_)) => StoreError::StaleWrite.into(),
            Ok(None) => AppointmentError::NotFound("Appointment"),
            Err(e) => e.into(),
        }
    }

    // ==============================================================================
    // QUERIES
    // ==============================================================================

    /// Open slots for a practitioner over an inclusive range of local dates.
    #[instrument(skip(self))]
    pub async fn get_availability(
        &self,
        practitioner_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailableSlot>, AppointmentError> {
        let range = DateRange::new(from, to, self.rules.max_availability_range_days)
            .map_err(availability_error)?;
        let practitioner = self.load_practitioner(practitioner_id).await?;

        if !practitioner.is_active {
            debug!("Practitioner {} inactive, no availability", practitioner_id);
            return Ok(Vec::new());
        }

        let offset = parse_utc_offset(&practitioner.timezone).map_err(availability_error)?;
        let (window_start, window_end) = local_range_bounds(range, offset)?;

        let commitments: Vec<TimeInterval> = self
            .store
            .list_commitments(practitioner_id, window_start, window_end, None)
            .await?
            .iter()
            .map(Appointment::interval)
            .collect();

        compute_available_slots(
            &practitioner,
            range,
            &commitments,
            self.rules.slot_granularity_minutes,
        )
        .map_err(availability_error)
    }

    pub async fn get_appointment(
        &self,
        caller: &CallerIdentity,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let owner = self.patient_owner(&appointment).await?;

        self.authorize(
            caller,
            Action::ViewAppointment,
            AccessTarget::appointment(owner, appointment.practitioner_id),
        )?;

        Ok(appointment)
    }

    pub async fn practitioner_schedule(
        &self,
        caller: &CallerIdentity,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if to <= from {
            return Err(AppointmentError::InvalidRange("end must be after start".to_string()));
        }
        if to - from > Duration::days(self.rules.max_availability_range_days) {
            return Err(AppointmentError::InvalidRange(format!(
                "range exceeds {} days",
                self.rules.max_availability_range_days
            )));
        }

        self.authorize(
            caller,
            Action::ViewSchedule,
            AccessTarget::practitioner(practitioner_id),
        )?;

        Ok(self
            .store
            .list_practitioner_appointments(practitioner_id, from, to)
            .await?)
    }

    pub async fn patient_appointments(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let patient = self.load_patient(patient_id).await?;

        self.authorize(
            caller,
            Action::ViewAppointment,
            AccessTarget::patient(patient.user_id),
        )?;

        Ok(self.store.list_patient_appointments(patient_id).await?)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    fn validate_interval(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TimeInterval, AppointmentError> {
        if start >= end {
            return Err(AppointmentError::InvalidInterval(
                "start must be before end".to_string(),
            ));
        }

        let granularity = self.rules.slot_granularity_minutes;
        if !is_aligned(start, granularity) || !is_aligned(end, granularity) {
            return Err(AppointmentError::InvalidInterval(format!(
                "start and end must fall on the {}-minute grid",
                granularity
            )));
        }

        if start < now + Duration::minutes(self.rules.min_booking_notice_minutes) {
            return Err(AppointmentError::InvalidInterval(
                "appointment starts too soon or in the past".to_string(),
            ));
        }

        Ok(TimeInterval::new(start, end))
    }

    fn template_override_allowed(&self, caller: &CallerIdentity, requested: bool) -> bool {
        requested && caller.is_admin() && self.rules.allow_admin_template_override
    }

    async fn ensure_bookable(
        &self,
        practitioner: &Practitioner,
        interval: TimeInterval,
        exclude: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        let commitments: Vec<TimeInterval> = self
            .store
            .list_commitments(practitioner.id, interval.start, interval.end, exclude)
            .await?
            .iter()
            .map(Appointment::interval)
            .collect();

        let fits = is_bookable(
            practitioner,
            interval,
            &commitments,
            self.rules.slot_granularity_minutes,
        )
        .map_err(availability_error)?;

        if fits {
            Ok(())
        } else {
            warn!(
                "Interval {} - {} not open for practitioner {}",
                interval.start, interval.end, practitioner.id
            );
            Err(AppointmentError::SlotUnavailable)
        }
    }

    fn authorize(
        &self,
        caller: &CallerIdentity,
        action: Action,
        target: AccessTarget,
    ) -> Result<(), AppointmentError> {
        if AccessPolicy::authorize(caller, action, &target).is_allowed() {
            Ok(())
        } else {
            Err(AppointmentError::Unauthorized)
        }
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound("Appointment"))
    }

    async fn load_patient(&self, patient_id: Uuid) -> Result<Patient, AppointmentError> {
        self.store
            .find_patient(patient_id)
            .await?
            .ok_or(AppointmentError::NotFound("Patient"))
    }

    async fn load_practitioner(&self, practitioner_id: Uuid) -> Result<Practitioner, AppointmentError> {
        self.store
            .find_practitioner(practitioner_id)
            .await?
            .ok_or(AppointmentError::NotFound("Practitioner"))
    }

    async fn patient_owner(&self, appointment: &Appointment) -> Result<Uuid, AppointmentError> {
        Ok(self.load_patient(appointment.patient_id).await?.user_id)
    }
}

fn availability_error(e: AvailabilityError) -> AppointmentError {
    match e {
        AvailabilityError::InvalidRange(msg) => AppointmentError::InvalidRange(msg),
        other => AppointmentError::StoreFailure(other.to_string()),
    }
}

/// UTC bounds covering every local day in `range`.
fn local_range_bounds(
    range: DateRange,
    offset: FixedOffset,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppointmentError> {
    let start_of = |day: NaiveDate| {
        day.and_hms_opt(0, 0, 0)
            .and_then(|midnight| offset.from_local_datetime(&midnight).single())
            .map(|instant| instant.with_timezone(&Utc))
    };

    let start = start_of(range.from());
    let end = range.to().succ_opt().and_then(start_of);

    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(AppointmentError::InvalidRange("date range out of bounds".to_string())),
    }
}
