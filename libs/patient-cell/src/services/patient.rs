use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use chrono::Utc;

use doctor_cell::{DoctorError, DoctorService};
use security_cell::{
    AccessPolicy, AccessTarget, Action, AuditService, CareTeamChange, CareTeamEvent, SupabaseAuditSink,
};
use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, UNIQUE_VIOLATION};
use shared_models::identity::{CallerIdentity, Role};

use crate::models::{
    MedicalRecord, MedicalRecordRequest, Patient, PatientError, PatientPractitionerAssignment,
    RegisterPatientRequest, UpdateMedicalRecordRequest, UpdatePatientRequest,
};

pub struct PatientService {
    supabase: SupabaseClient,
    doctors: DoctorService,
    audit: AuditService,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            doctors: DoctorService::new(config),
            audit: AuditService::new(Arc::new(SupabaseAuditSink::new(config, None))),
        }
    }

    /// Care team changes are recorded through `audit`.
    pub fn with_audit(mut self, audit: AuditService) -> Self {
        self.audit = audit;
        self
    }

    fn authorize(caller: &CallerIdentity, action: Action, patient: &Patient) -> Result<(), PatientError> {
        Self::authorize_target(caller, action, &AccessTarget::patient(patient.user_id))
    }

    fn authorize_target(caller: &CallerIdentity, action: Action, target: &AccessTarget) -> Result<(), PatientError> {
        if AccessPolicy::authorize(caller, action, target).is_allowed() {
            Ok(())
        } else {
            Err(PatientError::Unauthorized)
        }
    }

    async fn load_patient(&self, patient_id: Uuid, auth_token: &str) -> Result<Patient, PatientError> {
        self.find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)
    }

    /// Create the patient record for a user. Patients register themselves;
    /// admins may register on behalf of any user.
    pub async fn register_patient(
        &self,
        caller: &CallerIdentity,
        request: RegisterPatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let owner = match (caller.role, request.user_id) {
            (Role::Admin, Some(user_id)) => user_id,
            (Role::Admin, None) => {
                return Err(PatientError::ValidationError(
                    "user_id is required when registering on behalf of a user".to_string(),
                ))
            }
            (Role::Patient, None) => caller.user_id,
            (Role::Patient, Some(user_id)) if user_id == caller.user_id => user_id,
            _ => return Err(PatientError::Unauthorized),
        };

        if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
            return Err(PatientError::ValidationError("first and last name are required".to_string()));
        }

        if self.find_patient_by_user(owner, Some(auth_token)).await?.is_some() {
            return Err(PatientError::AlreadyRegistered(owner));
        }

        debug!("Registering patient record for user: {}", owner);

        let now = Utc::now().to_rfc3339();
        let patient_data = json!({
            "user_id": owner,
            "first_name": request.first_name,
            "last_name": request.last_name,
            "email": request.email,
            "phone_number": request.phone_number,
            "date_of_birth": request.date_of_birth,
            "gender": request.gender,
            "is_active": true,
            "created_at": now,
            "updated_at": now
        });

        let result: Vec<Patient> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/patients",
                Some(auth_token),
                Some(patient_data),
                Some(SupabaseClient::return_representation()),
            )
            .await
            .map_err(|e| match e.sqlstate() {
                Some(UNIQUE_VIOLATION) => PatientError::AlreadyRegistered(owner),
                _ => PatientError::Database(e),
            })?;

        let patient = result.into_iter().next().ok_or(PatientError::NotFound)?;
        info!("Patient {} registered for user {}", patient.id, owner);
        Ok(patient)
    }

    pub async fn find_patient(
        &self,
        patient_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<Patient>, PatientError> {
        debug!("Fetching patient: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Patient> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        Ok(result.into_iter().next())
    }

    pub async fn find_patient_by_user(
        &self,
        user_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<Patient>, PatientError> {
        let path = format!("/rest/v1/patients?user_id=eq.{}", user_id);
        let result: Vec<Patient> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await?;

        Ok(result.into_iter().next())
    }

    pub async fn get_patient(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let patient = self
            .find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)?;

        Self::authorize(caller, Action::ViewPatientRecord, &patient)?;
        Ok(patient)
    }

    pub async fn update_patient(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let patient = self
            .find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)?;

        Self::authorize(caller, Action::UpdatePatientRecord, &patient)?;

        if !patient.is_active {
            return Err(PatientError::Inactive);
        }

        let mut update_data = serde_json::Map::new();

        if let Some(first_name) = request.first_name {
            update_data.insert("first_name".to_string(), json!(first_name));
        }
        if let Some(last_name) = request.last_name {
            update_data.insert("last_name".to_string(), json!(last_name));
        }
        if let Some(email) = request.email {
            update_data.insert("email".to_string(), json!(email));
        }
        if let Some(phone_number) = request.phone_number {
            update_data.insert("phone_number".to_string(), json!(phone_number));
        }
        if let Some(date_of_birth) = request.date_of_birth {
            update_data.insert("date_of_birth".to_string(), json!(date_of_birth));
        }
        if let Some(gender) = request.gender {
            update_data.insert("gender".to_string(), json!(gender));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch_patient(patient_id, Value::Object(update_data), auth_token).await
    }

    /// Patients are never deleted. Deactivating twice is a no-op.
    pub async fn deactivate_patient(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let patient = self
            .find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)?;

        Self::authorize(caller, Action::UpdatePatientRecord, &patient)?;

        if !patient.is_active {
            debug!("Patient {} already inactive", patient_id);
            return Ok(patient);
        }

        let update = json!({
            "is_active": false,
            "updated_at": Utc::now().to_rfc3339()
        });
        let patient = self.patch_patient(patient_id, update, auth_token).await?;

        info!("Patient {} deactivated by {}", patient_id, caller.user_id);
        Ok(patient)
    }

    async fn patch_patient(
        &self,
        patient_id: Uuid,
        update: Value,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Patient> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        result.into_iter().next().ok_or(PatientError::NotFound)
    }

    // ==============================================================================
    // PRACTITIONER ASSIGNMENT
    // ==============================================================================

    pub async fn assign_practitioner(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<PatientPractitionerAssignment, PatientError> {
        let patient = self
            .find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)?;

        Self::authorize(caller, Action::UpdatePatientRecord, &patient)?;

        if !patient.is_active {
            return Err(PatientError::Inactive);
        }

        let practitioner = self
            .doctors
            .find_practitioner(practitioner_id, Some(auth_token))
            .await
            .map_err(|e| match e {
                DoctorError::Database(inner) => PatientError::Database(inner),
                other => PatientError::ValidationError(other.to_string()),
            })?;
        if practitioner.is_none() {
            return Err(PatientError::PractitionerNotFound);
        }

        let assignment_data = json!({
            "patient_id": patient_id,
            "practitioner_id": practitioner_id,
            "assigned_at": Utc::now().to_rfc3339()
        });

        let result: Vec<PatientPractitionerAssignment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/patient_practitioners",
                Some(auth_token),
                Some(assignment_data),
                Some(SupabaseClient::return_representation()),
            )
            .await
            .map_err(|e| match e.sqlstate() {
                Some(UNIQUE_VIOLATION) => PatientError::AlreadyAssigned,
                _ => PatientError::Database(e),
            })?;

        let assignment = result.into_iter().next().ok_or(PatientError::NotFound)?;
        info!("Practitioner {} assigned to patient {}", practitioner_id, patient_id);

        self.audit
            .emit_care_team(CareTeamEvent::new(
                patient_id,
                practitioner_id,
                CareTeamChange::Assigned,
                caller.user_id,
                assignment.assigned_at,
            ))
            .await;

        Ok(assignment)
    }

    pub async fn unassign_practitioner(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let patient = self
            .find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)?;

        Self::authorize(caller, Action::UpdatePatientRecord, &patient)?;

        let path = format!(
            "/rest/v1/patient_practitioners?patient_id=eq.{}&practitioner_id=eq.{}",
            patient_id, practitioner_id
        );
        let removed: Vec<PatientPractitionerAssignment> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        if removed.is_empty() {
            warn!("Practitioner {} was not assigned to patient {}", practitioner_id, patient_id);
            return Err(PatientError::NotAssigned);
        }

        info!("Practitioner {} unassigned from patient {}", practitioner_id, patient_id);

        self.audit
            .emit_care_team(CareTeamEvent::new(
                patient_id,
                practitioner_id,
                CareTeamChange::Unassigned,
                caller.user_id,
                Utc::now(),
            ))
            .await;

        Ok(())
    }

    pub async fn list_assigned_practitioners(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<PatientPractitionerAssignment>, PatientError> {
        let patient = self
            .find_patient(patient_id, Some(auth_token))
            .await?
            .ok_or(PatientError::NotFound)?;

        Self::authorize(caller, Action::ViewPatientRecord, &patient)?;

        let path = format!(
            "/rest/v1/patient_practitioners?patient_id=eq.{}&order=assigned_at.asc",
            patient_id
        );
        let assignments: Vec<PatientPractitionerAssignment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        debug!("Patient {} has {} assigned practitioners", patient_id, assignments.len());
        Ok(assignments)
    }

    /// Patients on a practitioner's care team, by last name.
    pub async fn list_assigned_patients(
        &self,
        caller: &CallerIdentity,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        Self::authorize_target(
            caller,
            Action::ViewAssignedPatients,
            &AccessTarget::practitioner(practitioner_id),
        )?;

        let path = format!(
            "/rest/v1/patient_practitioners?practitioner_id=eq.{}&order=assigned_at.asc",
            practitioner_id
        );
        let assignments: Vec<PatientPractitionerAssignment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        if assignments.is_empty() {
            return Ok(Vec::new());
        }

        let ids = assignments
            .iter()
            .map(|assignment| assignment.patient_id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let path = format!("/rest/v1/patients?id=in.({})&order=last_name.asc", ids);
        let patients: Vec<Patient> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        debug!("Practitioner {} has {} assigned patients", practitioner_id, patients.len());
        Ok(patients)
    }

    // ==============================================================================
    // MEDICAL RECORDS
    // ==============================================================================

    async fn is_assigned(
        &self,
        patient_id: Uuid,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<bool, PatientError> {
        let path = format!(
            "/rest/v1/patient_practitioners?patient_id=eq.{}&practitioner_id=eq.{}",
            patient_id, practitioner_id
        );
        let found: Vec<PatientPractitionerAssignment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(!found.is_empty())
    }

    /// Practitioners reach a patient's records only while assigned to them.
    async fn authorize_records(
        &self,
        caller: &CallerIdentity,
        action: Action,
        patient: &Patient,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let assigned = match caller.role {
            Role::Practitioner => self
                .is_assigned(patient.id, caller.user_id, auth_token)
                .await?
                .then_some(caller.user_id),
            _ => None,
        };

        Self::authorize_target(caller, action, &AccessTarget::care_team(patient.user_id, assigned))
    }

    pub async fn list_medical_records(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<MedicalRecord>, PatientError> {
        let patient = self.load_patient(patient_id, auth_token).await?;
        self.authorize_records(caller, Action::ViewMedicalRecord, &patient, auth_token)
            .await?;

        let path = format!(
            "/rest/v1/medical_records?patient_id=eq.{}&order=recorded_at.desc",
            patient_id
        );
        let records: Vec<MedicalRecord> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        debug!("Patient {} has {} medical records", patient_id, records.len());
        Ok(records)
    }

    pub async fn create_medical_record(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        request: MedicalRecordRequest,
        auth_token: &str,
    ) -> Result<MedicalRecord, PatientError> {
        let patient = self.load_patient(patient_id, auth_token).await?;
        self.authorize_records(caller, Action::ManageMedicalRecord, &patient, auth_token)
            .await?;

        if !patient.is_active {
            return Err(PatientError::Inactive);
        }
        if request.diagnosis.trim().is_empty() {
            return Err(PatientError::ValidationError("diagnosis is required".to_string()));
        }

        let author = match caller.role {
            Role::Practitioner => Some(caller.user_id),
            _ => None,
        };
        let now = Utc::now().to_rfc3339();
        let record_data = json!({
            "patient_id": patient_id,
            "practitioner_id": author,
            "diagnosis": request.diagnosis,
            "treatment": request.treatment,
            "notes": request.notes,
            "recorded_at": now,
            "updated_at": now
        });

        let result: Vec<MedicalRecord> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/medical_records",
                Some(auth_token),
                Some(record_data),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        let record = result.into_iter().next().ok_or(PatientError::RecordNotFound)?;
        info!("Medical record {} added for patient {} by {}", record.id, patient_id, caller.user_id);
        Ok(record)
    }

    pub async fn update_medical_record(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        record_id: Uuid,
        request: UpdateMedicalRecordRequest,
        auth_token: &str,
    ) -> Result<MedicalRecord, PatientError> {
        let patient = self.load_patient(patient_id, auth_token).await?;
        self.authorize_records(caller, Action::ManageMedicalRecord, &patient, auth_token)
            .await?;

        let mut update_data = serde_json::Map::new();

        if let Some(diagnosis) = request.diagnosis {
            if diagnosis.trim().is_empty() {
                return Err(PatientError::ValidationError("diagnosis cannot be blank".to_string()));
            }
            update_data.insert("diagnosis".to_string(), json!(diagnosis));
        }
        if let Some(treatment) = request.treatment {
            update_data.insert("treatment".to_string(), json!(treatment));
        }
        if let Some(notes) = request.notes {
            update_data.insert("notes".to_string(), json!(notes));
        }

        if update_data.is_empty() {
            return Err(PatientError::ValidationError("no fields to update".to_string()));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!(
            "/rest/v1/medical_records?id=eq.{}&patient_id=eq.{}",
            record_id, patient_id
        );
        let result: Vec<MedicalRecord> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        result.into_iter().next().ok_or(PatientError::RecordNotFound)
    }

    pub async fn delete_medical_record(
        &self,
        caller: &CallerIdentity,
        patient_id: Uuid,
        record_id: Uuid,
        auth_token: &str,
    ) -> Result<(), PatientError> {
        let patient = self.load_patient(patient_id, auth_token).await?;
        self.authorize_records(caller, Action::ManageMedicalRecord, &patient, auth_token)
            .await?;

        let path = format!(
            "/rest/v1/medical_records?id=eq.{}&patient_id=eq.{}",
            record_id, patient_id
        );
        let removed: Vec<MedicalRecord> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        if removed.is_empty() {
            return Err(PatientError::RecordNotFound);
        }

        info!("Medical record {} deleted from patient {} by {}", record_id, patient_id, caller.user_id);
        Ok(())
    }
}
