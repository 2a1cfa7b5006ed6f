use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::{InMemorySchedulingStore, SchedulingEngine};
use doctor_cell::{Practitioner, WeeklyWindow};
use patient_cell::Patient;
use security_cell::{
    AuditError, AuditService, AuditSink, CareTeamEvent, InMemoryAuditSink, TransitionEvent,
};
use shared_config::SchedulingRules;
use shared_models::identity::{CallerIdentity, Role};
use shared_utils::clock::ManualClock;

// 2025-06-02 is a Monday
fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

struct Clinic {
    engine: SchedulingEngine,
    store: Arc<InMemorySchedulingStore>,
    audit: Arc<InMemoryAuditSink>,
    clock: Arc<ManualClock>,
    practitioner: CallerIdentity,
    patient: CallerIdentity,
    patient_id: Uuid,
    admin: CallerIdentity,
}

impl Clinic {
    async fn new() -> Self {
        Self::with_rules(SchedulingRules::default()).await
    }

    async fn with_rules(rules: SchedulingRules) -> Self {
        let store = Arc::new(InMemorySchedulingStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));

        let practitioner = CallerIdentity::new(Uuid::new_v4(), Role::Practitioner);
        let patient = CallerIdentity::new(Uuid::new_v4(), Role::Patient);
        let admin = CallerIdentity::new(Uuid::new_v4(), Role::Admin);

        store
            .add_practitioner(practitioner_record(
                practitioner.user_id,
                vec![WeeklyWindow::new(Weekday::Mon, hm(9, 0), hm(12, 0))],
            ))
            .await;

        let patient_id = Uuid::new_v4();
        store.add_patient(patient_record(patient_id, patient.user_id)).await;

        let engine = SchedulingEngine::new(
            store.clone(),
            AuditService::new(audit.clone()),
            clock.clone(),
            rules,
        );

        Self {
            engine,
            store,
            audit,
            clock,
            practitioner,
            patient,
            patient_id,
            admin,
        }
    }

    fn request(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AppointmentRequest {
        AppointmentRequest {
            practitioner_id: self.practitioner.user_id,
            patient_id: self.patient_id,
            start_time: start,
            end_time: end,
            request_token: None,
            override_template: false,
        }
    }

    async fn book(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Appointment {
        self.engine
            .request_appointment(&self.patient, self.request(start, end))
            .await
            .unwrap()
    }
}

fn practitioner_record(id: Uuid, template: Vec<WeeklyWindow>) -> Practitioner {
    Practitioner {
        id,
        first_name: "Ada".to_string(),
        last_name: "Okafor".to_string(),
        specialty: Some("General Practice".to_string()),
        timezone: "UTC".to_string(),
        availability_template: template,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn patient_record(id: Uuid, user_id: Uuid) -> Patient {
    Patient {
        id,
        user_id,
        first_name: "Sam".to_string(),
        last_name: "Reyes".to_string(),
        email: Some("sam@example.com".to_string()),
        phone_number: None,
        date_of_birth: None,
        gender: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[tokio::test]
async fn availability_is_split_by_confirmed_appointment() {
    let clinic = Clinic::new().await;
    clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    let slots = clinic
        .engine
        .get_availability(clinic.practitioner.user_id, monday(), monday())
        .await
        .unwrap();

    let intervals: Vec<_> = slots.iter().map(|s| (s.start_time, s.end_time)).collect();
    assert_eq!(
        intervals,
        vec![
            (monday_at(9, 0), monday_at(10, 0)),
            (monday_at(10, 30), monday_at(12, 0)),
        ]
    );
}

#[tokio::test]
async fn cancelled_appointment_frees_its_slot() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    clinic
        .engine
        .cancel_appointment(&clinic.patient, booked.id, Some("conflict at work".to_string()))
        .await
        .unwrap();

    let slots = clinic
        .engine
        .get_availability(clinic.practitioner.user_id, monday(), monday())
        .await
        .unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].start_time, monday_at(9, 0));
    assert_eq!(slots[0].end_time, monday_at(12, 0));
}

#[tokio::test]
async fn availability_range_is_bounded() {
    let clinic = Clinic::new().await;

    let inverted = clinic
        .engine
        .get_availability(clinic.practitioner.user_id, monday(), monday() - Duration::days(1))
        .await;
    assert_matches!(inverted, Err(AppointmentError::InvalidRange(_)));

    let too_long = clinic
        .engine
        .get_availability(clinic.practitioner.user_id, monday(), monday() + Duration::days(365))
        .await;
    assert_matches!(too_long, Err(AppointmentError::InvalidRange(_)));
}

#[tokio::test]
async fn unknown_practitioner_has_no_availability() {
    let clinic = Clinic::new().await;
    let result = clinic.engine.get_availability(Uuid::new_v4(), monday(), monday()).await;
    assert_matches!(result, Err(AppointmentError::NotFound("Practitioner")));
}

// ==============================================================================
// REQUEST
// ==============================================================================

#[tokio::test]
async fn request_confirms_and_records_event() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    assert_eq!(booked.status, AppointmentStatus::Confirmed);
    assert_eq!(booked.booked_by, clinic.patient.user_id);

    let events = clinic.audit.events_for(booked.id).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].from_status, Some(AppointmentStatus::Requested));
    assert_eq!(events[0].to_status, AppointmentStatus::Confirmed);
    assert_eq!(events[0].actor_id, clinic.patient.user_id);
}

#[tokio::test]
async fn overlapping_or_out_of_template_requests_are_rejected() {
    let clinic = Clinic::new().await;
    clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    let overlapping = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(9, 30), monday_at(10, 15)))
        .await;
    assert_matches!(overlapping, Err(AppointmentError::SlotUnavailable));

    let before_hours = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(8, 0), monday_at(8, 30)))
        .await;
    assert_matches!(before_hours, Err(AppointmentError::SlotUnavailable));

    // Touching the existing booking is fine
    let adjacent = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 30), monday_at(11, 0)))
        .await;
    assert!(adjacent.is_ok());
}

#[tokio::test]
async fn malformed_intervals_are_rejected() {
    let clinic = Clinic::new().await;

    let inverted = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 0), monday_at(9, 0)))
        .await;
    assert_matches!(inverted, Err(AppointmentError::InvalidInterval(_)));

    let off_grid = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 5), monday_at(10, 30)))
        .await;
    assert_matches!(off_grid, Err(AppointmentError::InvalidInterval(_)));

    clinic.clock.set(monday_at(11, 0));
    let in_past = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 0), monday_at(10, 30)))
        .await;
    assert_matches!(in_past, Err(AppointmentError::InvalidInterval(_)));
}

#[tokio::test]
async fn booking_notice_is_enforced() {
    let rules = SchedulingRules {
        min_booking_notice_minutes: 120,
        ..SchedulingRules::default()
    };
    let clinic = Clinic::with_rules(rules).await;
    clinic.clock.set(monday_at(8, 30));

    let short_notice = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 0), monday_at(10, 30)))
        .await;
    assert_matches!(short_notice, Err(AppointmentError::InvalidInterval(_)));

    let enough_notice = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 30), monday_at(11, 0)))
        .await;
    assert!(enough_notice.is_ok());
}

#[tokio::test]
async fn concurrent_identical_requests_commit_once() {
    let clinic = Clinic::new().await;

    let attempts = (0..5).map(|_| {
        clinic
            .engine
            .request_appointment(&clinic.patient, clinic.request(monday_at(10, 0), monday_at(10, 30)))
    });
    let results = join_all(attempts).await;

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(result, Err(AppointmentError::SlotUnavailable));
    }

    let stored = clinic.store.appointments().await;
    assert_eq!(stored.iter().filter(|a| a.is_commitment()).count(), 1);
}

#[tokio::test]
async fn repeated_request_token_replays_original() {
    let clinic = Clinic::new().await;
    let mut request = clinic.request(monday_at(10, 0), monday_at(10, 30));
    request.request_token = Some("retry-1".to_string());

    let first = clinic
        .engine
        .request_appointment(&clinic.patient, request.clone())
        .await
        .unwrap();
    let second = clinic
        .engine
        .request_appointment(&clinic.patient, request.clone())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(clinic.store.appointments().await.len(), 1);
    assert_eq!(clinic.audit.events().await.len(), 1);

    request.start_time = monday_at(11, 0);
    request.end_time = monday_at(11, 30);
    let reused = clinic.engine.request_appointment(&clinic.patient, request).await;
    assert_matches!(reused, Err(AppointmentError::InvalidRequest(_)));
}

#[tokio::test]
async fn request_token_is_checked_after_authorization() {
    let clinic = Clinic::new().await;
    let mut request = clinic.request(monday_at(10, 0), monday_at(10, 30));
    request.request_token = Some("retry-2".to_string());
    clinic
        .engine
        .request_appointment(&clinic.patient, request.clone())
        .await
        .unwrap();

    // Same token and body from a caller who does not own the patient record
    let stranger = CallerIdentity::new(Uuid::new_v4(), Role::Patient);
    let result = clinic.engine.request_appointment(&stranger, request).await;

    assert_matches!(result, Err(AppointmentError::Unauthorized));
    assert_eq!(clinic.store.appointments().await.len(), 1);
}

#[tokio::test]
async fn patient_cannot_book_for_someone_else() {
    let clinic = Clinic::new().await;
    let stranger = CallerIdentity::new(Uuid::new_v4(), Role::Patient);

    let result = clinic
        .engine
        .request_appointment(&stranger, clinic.request(monday_at(10, 0), monday_at(10, 30)))
        .await;
    assert_matches!(result, Err(AppointmentError::Unauthorized));
    assert!(clinic.store.appointments().await.is_empty());
}

#[tokio::test]
async fn unknown_patient_is_not_found() {
    let clinic = Clinic::new().await;
    let mut request = clinic.request(monday_at(10, 0), monday_at(10, 30));
    request.patient_id = Uuid::new_v4();

    let result = clinic.engine.request_appointment(&clinic.admin, request).await;
    assert_matches!(result, Err(AppointmentError::NotFound("Patient")));
}

#[tokio::test]
async fn admin_override_books_outside_template() {
    let clinic = Clinic::new().await;
    let mut request = clinic.request(monday_at(14, 0), monday_at(14, 30));
    request.override_template = true;

    let by_patient = clinic
        .engine
        .request_appointment(&clinic.patient, request.clone())
        .await;
    assert_matches!(by_patient, Err(AppointmentError::SlotUnavailable));

    let by_admin = clinic
        .engine
        .request_appointment(&clinic.admin, request.clone())
        .await
        .unwrap();
    assert_eq!(by_admin.booked_by, clinic.admin.user_id);

    // The override skips the template, never the overlap rule
    let clash = clinic.engine.request_appointment(&clinic.admin, request).await;
    assert_matches!(clash, Err(AppointmentError::SlotUnavailable));
}

#[tokio::test]
async fn inactive_practitioner_cannot_be_booked() {
    let clinic = Clinic::new().await;
    let mut retired = practitioner_record(
        clinic.practitioner.user_id,
        vec![WeeklyWindow::new(Weekday::Mon, hm(9, 0), hm(12, 0))],
    );
    retired.is_active = false;
    clinic.store.add_practitioner(retired).await;

    let result = clinic
        .engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 0), monday_at(10, 30)))
        .await;
    assert_matches!(result, Err(AppointmentError::Unauthorized));

    let slots = clinic
        .engine
        .get_availability(clinic.practitioner.user_id, monday(), monday())
        .await
        .unwrap();
    assert!(slots.is_empty());
}

// ==============================================================================
// CANCEL
// ==============================================================================

#[tokio::test]
async fn cancelling_twice_reports_terminal_status() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    let cancelled = clinic
        .engine
        .cancel_appointment(&clinic.patient, booked.id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

    let again = clinic.engine.cancel_appointment(&clinic.patient, booked.id, None).await;
    assert_matches!(
        again,
        Err(AppointmentError::AlreadyTerminal(AppointmentStatus::Cancelled))
    );

    let events = clinic.audit.events_for(booked.id).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].from_status, Some(AppointmentStatus::Confirmed));
    assert_eq!(events[1].to_status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn only_owner_practitioner_or_admin_may_cancel() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    let other_patient = CallerIdentity::new(Uuid::new_v4(), Role::Patient);
    let other_practitioner = CallerIdentity::new(Uuid::new_v4(), Role::Practitioner);

    for intruder in [&other_patient, &other_practitioner] {
        let result = clinic.engine.cancel_appointment(intruder, booked.id, None).await;
        assert_matches!(result, Err(AppointmentError::Unauthorized));
    }

    let by_admin = clinic
        .engine
        .cancel_appointment(&clinic.admin, booked.id, Some("clinic closed".to_string()))
        .await
        .unwrap();
    assert_eq!(by_admin.cancellation_reason.as_deref(), Some("clinic closed"));
}

#[tokio::test]
async fn cancellation_notice_applies_to_non_admins() {
    let rules = SchedulingRules {
        min_cancellation_notice_minutes: 60,
        ..SchedulingRules::default()
    };
    let clinic = Clinic::with_rules(rules).await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    clinic.clock.set(monday_at(9, 30));
    let late = clinic.engine.cancel_appointment(&clinic.patient, booked.id, None).await;
    assert_matches!(late, Err(AppointmentError::TooLate(_)));

    let admin = clinic.engine.cancel_appointment(&clinic.admin, booked.id, None).await;
    assert!(admin.is_ok());
}

#[tokio::test]
async fn cancelling_unknown_appointment_is_not_found() {
    let clinic = Clinic::new().await;
    let result = clinic.engine.cancel_appointment(&clinic.admin, Uuid::new_v4(), None).await;
    assert_matches!(result, Err(AppointmentError::NotFound("Appointment")));
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

fn reschedule_to(start: DateTime<Utc>, end: DateTime<Utc>) -> RescheduleAppointmentRequest {
    RescheduleAppointmentRequest {
        start_time: start,
        end_time: end,
        reason: Some("patient asked".to_string()),
        override_template: false,
    }
}

#[tokio::test]
async fn reschedule_cancels_original_and_links_replacement() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    // Overlapping its own old slot is allowed
    let moved = clinic
        .engine
        .reschedule_appointment(
            &clinic.practitioner,
            booked.id,
            reschedule_to(monday_at(10, 15), monday_at(10, 45)),
        )
        .await
        .unwrap();

    assert_eq!(moved.cancelled.id, booked.id);
    assert_eq!(moved.cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(moved.replacement.status, AppointmentStatus::Confirmed);
    assert_eq!(moved.replacement.rescheduled_from, Some(booked.id));
    assert_eq!(moved.replacement.patient_id, booked.patient_id);

    assert_eq!(clinic.audit.events_for(booked.id).await.len(), 2);
    assert_eq!(clinic.audit.events_for(moved.replacement.id).await.len(), 1);
}

#[tokio::test]
async fn failed_reschedule_leaves_original_untouched() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;
    clinic.book(monday_at(11, 0), monday_at(11, 30)).await;

    let result = clinic
        .engine
        .reschedule_appointment(
            &clinic.admin,
            booked.id,
            reschedule_to(monday_at(11, 0), monday_at(11, 30)),
        )
        .await;
    assert_matches!(result, Err(AppointmentError::SlotUnavailable));

    let stored = clinic.store.appointments().await;
    assert_eq!(stored.len(), 2);
    let original = stored.iter().find(|a| a.id == booked.id).unwrap();
    assert_eq!(original.status, AppointmentStatus::Confirmed);
    assert_eq!(original.start_time, monday_at(10, 0));
}

#[tokio::test]
async fn patient_may_not_reschedule() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    let result = clinic
        .engine
        .reschedule_appointment(
            &clinic.patient,
            booked.id,
            reschedule_to(monday_at(11, 0), monday_at(11, 30)),
        )
        .await;
    assert_matches!(result, Err(AppointmentError::Unauthorized));
}

#[tokio::test]
async fn started_appointment_cannot_be_rescheduled() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    clinic.clock.set(monday_at(10, 0));
    let result = clinic
        .engine
        .reschedule_appointment(
            &clinic.practitioner,
            booked.id,
            reschedule_to(monday_at(11, 0), monday_at(11, 30)),
        )
        .await;
    assert_matches!(result, Err(AppointmentError::TooLate(_)));
}

// ==============================================================================
// OUTCOME
// ==============================================================================

#[tokio::test]
async fn outcome_before_start_is_too_early_for_everyone() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;

    for caller in [&clinic.patient, &clinic.practitioner, &clinic.admin] {
        let result = clinic
            .engine
            .mark_outcome(caller, booked.id, Outcome::Completed)
            .await;
        assert_matches!(result, Err(AppointmentError::TooEarly));
    }
}

#[tokio::test]
async fn practitioner_records_outcome_once() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;
    clinic.clock.set(monday_at(10, 40));

    let by_patient = clinic
        .engine
        .mark_outcome(&clinic.patient, booked.id, Outcome::Completed)
        .await;
    assert_matches!(by_patient, Err(AppointmentError::Unauthorized));

    let done = clinic
        .engine
        .mark_outcome(&clinic.practitioner, booked.id, Outcome::NoShow)
        .await
        .unwrap();
    assert_eq!(done.status, AppointmentStatus::NoShow);

    let again = clinic
        .engine
        .mark_outcome(&clinic.practitioner, booked.id, Outcome::Completed)
        .await;
    assert_matches!(
        again,
        Err(AppointmentError::AlreadyTerminal(AppointmentStatus::NoShow))
    );
}

// ==============================================================================
// VIEWS
// ==============================================================================

#[tokio::test]
async fn views_respect_ownership() {
    let clinic = Clinic::new().await;
    let booked = clinic.book(monday_at(10, 0), monday_at(10, 30)).await;
    let stranger = CallerIdentity::new(Uuid::new_v4(), Role::Patient);

    assert!(clinic.engine.get_appointment(&clinic.patient, booked.id).await.is_ok());
    assert!(clinic.engine.get_appointment(&clinic.practitioner, booked.id).await.is_ok());
    assert_matches!(
        clinic.engine.get_appointment(&stranger, booked.id).await,
        Err(AppointmentError::Unauthorized)
    );

    let mine = clinic
        .engine
        .patient_appointments(&clinic.patient, clinic.patient_id)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_matches!(
        clinic.engine.patient_appointments(&stranger, clinic.patient_id).await,
        Err(AppointmentError::Unauthorized)
    );

    let schedule = clinic
        .engine
        .practitioner_schedule(
            &clinic.practitioner,
            clinic.practitioner.user_id,
            monday_at(0, 0),
            monday_at(23, 0),
        )
        .await
        .unwrap();
    assert_eq!(schedule.len(), 1);
    assert_matches!(
        clinic
            .engine
            .practitioner_schedule(&clinic.patient, clinic.practitioner.user_id, monday_at(0, 0), monday_at(23, 0))
            .await,
        Err(AppointmentError::Unauthorized)
    );
}

// ==============================================================================
// AUDIT OUTAGES
// ==============================================================================

struct UnavailableSink;

#[async_trait]
impl AuditSink for UnavailableSink {
    async fn append(&self, _event: &TransitionEvent) -> Result<(), AuditError> {
        Err(AuditError::Sink("audit store unavailable".to_string()))
    }

    async fn append_care_team(&self, _event: &CareTeamEvent) -> Result<(), AuditError> {
        Err(AuditError::Sink("audit store unavailable".to_string()))
    }
}

#[tokio::test]
async fn audit_outage_does_not_undo_transitions() {
    let clinic = Clinic::new().await;
    let engine = SchedulingEngine::new(
        clinic.store.clone(),
        AuditService::new(Arc::new(UnavailableSink)),
        clinic.clock.clone(),
        SchedulingRules::default(),
    );

    let booked = engine
        .request_appointment(&clinic.patient, clinic.request(monday_at(10, 0), monday_at(10, 30)))
        .await
        .unwrap();
    assert_eq!(booked.status, AppointmentStatus::Confirmed);

    let cancelled = engine
        .cancel_appointment(&clinic.patient, booked.id, Some("travel".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

    let stored = clinic.store.appointments().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, booked.id);
    assert_eq!(stored[0].status, AppointmentStatus::Cancelled);
    assert!(clinic.audit.events().await.is_empty());
}
