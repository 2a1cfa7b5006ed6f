// =====================================================================================
// APPOINTMENT CELL - SCHEDULING ENGINE
// =====================================================================================
//
// Books, cancels, reschedules and closes out appointments. Availability is
// derived from the practitioner's weekly template minus existing commitments;
// the store guarantees no two commitments of one practitioner overlap.
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::{AppointmentState, Backend};
pub use models::{
    Appointment, AppointmentError, AppointmentRequest, AppointmentStatus, Outcome,
    RescheduleAppointmentRequest, RescheduledAppointment,
};
pub use router::appointment_routes;
pub use services::{
    InMemorySchedulingStore, SchedulingEngine, SchedulingStore, StoreError, SupabaseSchedulingStore,
};
