use tracing::{debug, warn};

use shared_models::identity::{CallerIdentity, Role};

use crate::models::{AccessDecision, AccessTarget, Action};

/// Stateless role/ownership rules. Evaluated before every mutation and
/// every record read; it never touches storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    const PATIENT_ACTIONS: [Action; 5] = [
        Action::RequestAppointment,
        Action::CancelAppointment,
        Action::ViewAppointment,
        Action::ViewPatientRecord,
        Action::UpdatePatientRecord,
    ];

    const PRACTITIONER_ACTIONS: [Action; 9] = [
        Action::CancelAppointment,
        Action::RescheduleAppointment,
        Action::MarkOutcome,
        Action::ViewSchedule,
        Action::ViewAppointment,
        Action::ManagePractitionerProfile,
        Action::ViewMedicalRecord,
        Action::ManageMedicalRecord,
        Action::ViewAssignedPatients,
    ];

    pub fn authorize(caller: &CallerIdentity, action: Action, target: &AccessTarget) -> AccessDecision {
        let allowed = match caller.role {
            Role::Admin => true,
            Role::Patient => {
                target.patient_owner == Some(caller.user_id)
                    && Self::PATIENT_ACTIONS.contains(&action)
            }
            Role::Practitioner => {
                target.practitioner == Some(caller.user_id)
                    && Self::PRACTITIONER_ACTIONS.contains(&action)
            }
        };

        if allowed {
            debug!("Allow {} for {} {}", action, caller.role, caller.user_id);
            AccessDecision::Allow
        } else {
            warn!(
                user_id = %caller.user_id,
                role = %caller.role,
                action = %action,
                patient_owner = ?target.patient_owner,
                practitioner = ?target.practitioner,
                "Access denied"
            );
            AccessDecision::Deny
        }
    }
}
