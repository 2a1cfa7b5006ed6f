pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    AvailabilityError, AvailableSlot, DateRange, DoctorError, Practitioner, TimeInterval,
    WeeklyWindow,
};
pub use services::{AvailabilityWindow, DoctorService};
