pub mod appointment;
pub mod auth;
pub mod error;
pub mod identity;

pub use appointment::AppointmentStatus;
pub use identity::{CallerIdentity, IdentityError, Role};
