//! Domain records.
//!
//! Records holding protected fields are generic over the field type: the
//! stored form carries [`Envelope`](crate::crypto::Envelope)s and the
//! revealed form carries plaintext `String`s.

mod billing;
mod clinical;
mod directory;
mod inventory;
mod scheduling;

pub use billing::{Invoice, InvoiceLine, InvoiceLineUpdate, NewInvoice, NewInvoiceLine};
pub use clinical::{
    Encounter, MedicalAct, MedicalActUpdate, NewEncounter, NewMedicalAct, NewPatient, Patient,
    PatientUpdate, StoredEncounter, StoredPatient,
};
pub use directory::{NewPrincipal, PrincipalRecord, Tenant};
pub use inventory::{InventoryItem, LedgerEntry, MovementDirection, NewInventoryItem, NewLedgerEntry};
pub use scheduling::{Appointment, AppointmentStatus, NewAppointment};

/// Generates an identifier for a new record.
pub(crate) fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
