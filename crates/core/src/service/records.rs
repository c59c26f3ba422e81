//! Record operations of [`RequestScope`].
//!
//! Operations on records with protected fields are `async`: plaintext is
//! sealed before the unit of work opens and revealed after it commits.

use tracing::instrument;

use super::RequestScope;
use crate::crypto::Envelope;
use crate::error::CoreResult;
use crate::types::{
    Appointment, Encounter, InventoryItem, Invoice, InvoiceLine, InvoiceLineUpdate, LedgerEntry,
    MedicalAct, MedicalActUpdate, NewAppointment, NewEncounter, NewInventoryItem, NewInvoice,
    NewInvoiceLine, NewLedgerEntry, NewMedicalAct, NewPatient, Patient, PatientUpdate,
    StoredEncounter, StoredPatient,
};

impl RequestScope {
    async fn reveal_patients(&self, stored: Vec<StoredPatient>) -> CoreResult<Vec<Patient>> {
        let envelopes: Vec<Option<&Envelope>> =
            stored.iter().map(|p| p.clinical_notes.as_ref()).collect();
        let notes = self.fields().decrypt_batch(&envelopes).await;
        stored
            .into_iter()
            .zip(notes)
            .map(|(patient, notes)| Ok(patient.with_notes(notes?)))
            .collect()
    }

    async fn reveal_patient(&self, stored: StoredPatient) -> CoreResult<Patient> {
        let notes = self.reveal_field(stored.clinical_notes.as_ref()).await?;
        Ok(stored.with_notes(notes))
    }

    async fn reveal_encounters(&self, stored: Vec<StoredEncounter>) -> CoreResult<Vec<Encounter>> {
        let envelopes: Vec<Option<&Envelope>> =
            stored.iter().map(|e| e.care_plan.as_ref()).collect();
        let plans = self.fields().decrypt_batch(&envelopes).await;
        stored
            .into_iter()
            .zip(plans)
            .map(|(encounter, plan)| Ok(encounter.with_care_plan(plan?)))
            .collect()
    }

    /// Registers a patient. Clinical notes are stored encrypted.
    #[instrument(skip(self, new), fields(principal = %self.context().principal_id()))]
    pub async fn create_patient(&self, new: NewPatient) -> CoreResult<Patient> {
        let notes = self.protect_field(new.clinical_notes.as_deref()).await?;
        let stored = self.write(|uow| uow.insert_patient(new.with_notes(notes)))?;
        self.reveal_patient(stored).await
    }

    pub async fn get_patient(&self, id: &str) -> CoreResult<Option<Patient>> {
        match self.read(|uow| uow.get_patient(id))? {
            Some(stored) => Ok(Some(self.reveal_patient(stored).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_patients(&self) -> CoreResult<Vec<Patient>> {
        let stored = self.read(|uow| uow.list_patients())?;
        self.reveal_patients(stored).await
    }

    /// Prefix search over patient names and documents.
    pub async fn search_patients(&self, term: &str) -> CoreResult<Vec<Patient>> {
        let stored = self.read(|uow| uow.search_patients(term))?;
        self.reveal_patients(stored).await
    }

    #[instrument(skip(self, update), fields(principal = %self.context().principal_id()))]
    pub async fn update_patient(&self, id: &str, update: PatientUpdate) -> CoreResult<Patient> {
        let notes = self.protect_field(update.clinical_notes.as_deref()).await?;
        let stored = self.write(|uow| uow.update_patient(id, update.with_notes(notes)))?;
        self.reveal_patient(stored).await
    }

    /// Opens an encounter. The care plan is stored encrypted.
    #[instrument(skip(self, new), fields(principal = %self.context().principal_id()))]
    pub async fn open_encounter(&self, new: NewEncounter) -> CoreResult<Encounter> {
        let plan = self.protect_field(new.care_plan.as_deref()).await?;
        let stored = self.write(|uow| uow.insert_encounter(new.with_care_plan(plan)))?;
        let plan = self.reveal_field(stored.care_plan.as_ref()).await?;
        Ok(stored.with_care_plan(plan))
    }

    pub async fn get_encounter(&self, id: &str) -> CoreResult<Option<Encounter>> {
        let Some(stored) = self.read(|uow| uow.get_encounter(id))? else {
            return Ok(None);
        };
        let plan = self.reveal_field(stored.care_plan.as_ref()).await?;
        Ok(Some(stored.with_care_plan(plan)))
    }

    pub async fn list_encounters(&self, patient_id: Option<&str>) -> CoreResult<Vec<Encounter>> {
        let stored = self.read(|uow| uow.list_encounters(patient_id))?;
        self.reveal_encounters(stored).await
    }

    #[instrument(skip(self, new), fields(principal = %self.context().principal_id()))]
    pub fn record_medical_act(&self, new: &NewMedicalAct) -> CoreResult<MedicalAct> {
        self.write(|uow| uow.insert_medical_act(new))
    }

    #[instrument(skip(self, update), fields(principal = %self.context().principal_id()))]
    pub fn update_medical_act(&self, id: &str, update: &MedicalActUpdate) -> CoreResult<MedicalAct> {
        self.write(|uow| uow.update_medical_act(id, update))
    }

    pub fn get_medical_act(&self, id: &str) -> CoreResult<Option<MedicalAct>> {
        self.read(|uow| uow.get_medical_act(id))
    }

    pub fn list_medical_acts(&self, encounter_id: &str) -> CoreResult<Vec<MedicalAct>> {
        self.read(|uow| uow.list_medical_acts(encounter_id))
    }

    #[instrument(skip(self, new), fields(principal = %self.context().principal_id()))]
    pub fn create_invoice(&self, new: &NewInvoice) -> CoreResult<Invoice> {
        self.write(|uow| uow.insert_invoice(new))
    }

    pub fn get_invoice(&self, id: &str) -> CoreResult<Option<Invoice>> {
        self.read(|uow| uow.get_invoice(id))
    }

    pub fn list_invoices(&self, patient_id: Option<&str>) -> CoreResult<Vec<Invoice>> {
        self.read(|uow| uow.list_invoices(patient_id))
    }

    #[instrument(skip(self, new), fields(principal = %self.context().principal_id(), invoice_id = %new.invoice_id))]
    pub fn add_invoice_line(&self, new: &NewInvoiceLine) -> CoreResult<InvoiceLine> {
        self.write(|uow| uow.insert_invoice_line(new))
    }

    #[instrument(skip(self, update), fields(principal = %self.context().principal_id()))]
    pub fn update_invoice_line(&self, id: &str, update: &InvoiceLineUpdate) -> CoreResult<InvoiceLine> {
        self.write(|uow| uow.update_invoice_line(id, update))
    }

    /// Removes a line and returns the invoice with its recomputed total.
    #[instrument(skip(self), fields(principal = %self.context().principal_id()))]
    pub fn remove_invoice_line(&self, id: &str) -> CoreResult<Invoice> {
        self.write(|uow| uow.delete_invoice_line(id))
    }

    pub fn list_invoice_lines(&self, invoice_id: &str) -> CoreResult<Vec<InvoiceLine>> {
        self.read(|uow| uow.list_invoice_lines(invoice_id))
    }

    /// Re-derives an invoice total from its lines.
    pub fn recompute_invoice(&self, invoice_id: &str) -> CoreResult<Invoice> {
        self.write(|uow| uow.recompute_invoice(invoice_id))
    }

    #[instrument(skip(self, new), fields(principal = %self.context().principal_id(), sku = %new.sku))]
    pub fn create_inventory_item(&self, new: &NewInventoryItem) -> CoreResult<InventoryItem> {
        self.write(|uow| uow.insert_inventory_item(new))
    }

    pub fn get_inventory_item(&self, id: &str) -> CoreResult<Option<InventoryItem>> {
        self.read(|uow| uow.get_inventory_item(id))
    }

    pub fn list_inventory_items(&self) -> CoreResult<Vec<InventoryItem>> {
        self.read(|uow| uow.list_inventory_items())
    }

    /// Appends a stock movement. Outbound movements beyond the available
    /// stock fail with `InsufficientStock`.
    #[instrument(
        skip(self, new),
        fields(principal = %self.context().principal_id(), item_id = %new.item_id, direction = %new.direction)
    )]
    pub fn record_stock_movement(&self, new: &NewLedgerEntry) -> CoreResult<LedgerEntry> {
        self.write(|uow| uow.append_ledger_entry(new))
    }

    pub fn list_ledger_entries(&self, item_id: &str) -> CoreResult<Vec<LedgerEntry>> {
        self.read(|uow| uow.list_ledger_entries(item_id))
    }

    pub fn ledger_balance(&self, item_id: &str) -> CoreResult<i64> {
        self.read(|uow| uow.ledger_balance(item_id))
    }

    #[instrument(
        skip(self, new),
        fields(principal = %self.context().principal_id(), practitioner_id = %new.practitioner_id)
    )]
    pub fn book_appointment(&self, new: &NewAppointment) -> CoreResult<Appointment> {
        self.write(|uow| uow.book_appointment(new))
    }

    #[instrument(skip(self), fields(principal = %self.context().principal_id()))]
    pub fn cancel_appointment(&self, id: &str) -> CoreResult<Appointment> {
        self.write(|uow| uow.cancel_appointment(id))
    }

    pub fn get_appointment(&self, id: &str) -> CoreResult<Option<Appointment>> {
        self.read(|uow| uow.get_appointment(id))
    }

    pub fn list_appointments(&self, practitioner_id: Option<&str>) -> CoreResult<Vec<Appointment>> {
        self.read(|uow| uow.list_appointments(practitioner_id))
    }
}
