pub mod models;
pub mod handlers;
pub mod router;
pub mod services;

pub use models::{MedicalRecord, Patient, PatientError, PatientPractitionerAssignment};
pub use router::{assigned_patient_routes, create_patient_router};
pub use services::PatientService;
