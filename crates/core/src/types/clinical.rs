//! Patients, encounters and medical acts.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::crypto::Envelope;
use crate::tenant::TenantId;

/// A patient. `clinical_notes` is a protected field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient<F = String> {
    pub id: String,
    pub tenant_id: TenantId,
    pub full_name: String,
    pub document: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub clinical_notes: Option<F>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A patient as held in storage.
pub type StoredPatient = Patient<Envelope>;

impl<F> Patient<F> {
    /// Replaces the protected field, changing its representation.
    pub fn with_notes<G>(self, clinical_notes: Option<G>) -> Patient<G> {
        Patient {
            id: self.id,
            tenant_id: self.tenant_id,
            full_name: self.full_name,
            document: self.document,
            birth_date: self.birth_date,
            clinical_notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for registering a patient.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPatient<F = String> {
    pub full_name: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default = "Option::default")]
    pub clinical_notes: Option<F>,
}

impl NewPatient {
    pub fn named(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            document: None,
            birth_date: None,
            clinical_notes: None,
        }
    }

    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn notes(mut self, clinical_notes: impl Into<String>) -> Self {
        self.clinical_notes = Some(clinical_notes.into());
        self
    }
}

impl<F> NewPatient<F> {
    /// Replaces the protected field, changing its representation.
    pub fn with_notes<G>(self, clinical_notes: Option<G>) -> NewPatient<G> {
        NewPatient {
            full_name: self.full_name,
            document: self.document,
            birth_date: self.birth_date,
            clinical_notes,
        }
    }
}

/// Replacement values for a patient. `None` leaves a field unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientUpdate<F = String> {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default = "Option::default")]
    pub clinical_notes: Option<F>,
}

impl<F> Default for PatientUpdate<F> {
    fn default() -> Self {
        Self {
            full_name: None,
            document: None,
            birth_date: None,
            clinical_notes: None,
        }
    }
}

impl<F> PatientUpdate<F> {
    /// Replaces the protected field, changing its representation.
    pub fn with_notes<G>(self, clinical_notes: Option<G>) -> PatientUpdate<G> {
        PatientUpdate {
            full_name: self.full_name,
            document: self.document,
            birth_date: self.birth_date,
            clinical_notes,
        }
    }
}

/// A clinical encounter. `care_plan` is a protected field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encounter<F = String> {
    pub id: String,
    pub tenant_id: TenantId,
    pub patient_id: String,
    pub reason: String,
    pub care_plan: Option<F>,
    pub opened_at: DateTime<Utc>,
}

/// An encounter as held in storage.
pub type StoredEncounter = Encounter<Envelope>;

impl<F> Encounter<F> {
    /// Replaces the protected field, changing its representation.
    pub fn with_care_plan<G>(self, care_plan: Option<G>) -> Encounter<G> {
        Encounter {
            id: self.id,
            tenant_id: self.tenant_id,
            patient_id: self.patient_id,
            reason: self.reason,
            care_plan,
            opened_at: self.opened_at,
        }
    }
}

/// Input for opening an encounter.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEncounter<F = String> {
    pub patient_id: String,
    pub reason: String,
    #[serde(default = "Option::default")]
    pub care_plan: Option<F>,
}

impl NewEncounter {
    pub fn new(patient_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            reason: reason.into(),
            care_plan: None,
        }
    }
}

impl<F> NewEncounter<F> {
    /// Replaces the protected field, changing its representation.
    pub fn with_care_plan<G>(self, care_plan: Option<G>) -> NewEncounter<G> {
        NewEncounter {
            patient_id: self.patient_id,
            reason: self.reason,
            care_plan,
        }
    }
}

/// A billable act performed during an encounter.
///
/// Commission amounts are always derived from `price` and the rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MedicalAct {
    pub id: String,
    pub encounter_id: String,
    /// Owner, resolved through the encounter.
    pub tenant_id: TenantId,
    pub description: String,
    pub price: Decimal,
    pub internal_rate: Decimal,
    pub external_rate: Decimal,
    pub internal_amount: Decimal,
    pub external_amount: Decimal,
    pub performed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for recording a medical act.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMedicalAct {
    pub encounter_id: String,
    pub description: String,
    pub price: Decimal,
    pub internal_rate: Decimal,
    pub external_rate: Decimal,
    /// Accepted for wire compatibility and ignored.
    #[serde(default)]
    pub internal_amount: Option<Decimal>,
    /// Accepted for wire compatibility and ignored.
    #[serde(default)]
    pub external_amount: Option<Decimal>,
}

impl NewMedicalAct {
    pub fn new(
        encounter_id: impl Into<String>,
        description: impl Into<String>,
        price: Decimal,
        internal_rate: Decimal,
        external_rate: Decimal,
    ) -> Self {
        Self {
            encounter_id: encounter_id.into(),
            description: description.into(),
            price,
            internal_rate,
            external_rate,
            internal_amount: None,
            external_amount: None,
        }
    }
}

/// Changes to a medical act. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicalActUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub internal_rate: Option<Decimal>,
    #[serde(default)]
    pub external_rate: Option<Decimal>,
    /// Accepted for wire compatibility and ignored.
    #[serde(default)]
    pub internal_amount: Option<Decimal>,
    /// Accepted for wire compatibility and ignored.
    #[serde(default)]
    pub external_amount: Option<Decimal>,
}
