//! Patients, encounters and medical acts.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use crate::audit::AuditOperation;
use crate::consistency::{ActPricing, normalize_term};
use crate::crypto::Envelope;
use crate::error::{CoreResult, ResourceError, ValidationError};
use crate::tenant::{EntityKind, Operation, ScopedQuery};
use crate::types::{
    MedicalAct, MedicalActUpdate, NewEncounter, NewMedicalAct, NewPatient, PatientUpdate,
    StoredEncounter, StoredPatient, new_record_id,
};

use super::super::rows::{
    decimal, envelope, format_date, format_timestamp, opt_date, tenant_id, timestamp,
};
use super::super::SqliteUnitOfWork;

const PATIENT_COLUMNS: &str = "p.id, p.tenant_id, p.full_name, p.document, p.birth_date, \
     p.clinical_notes, p.created_at, p.updated_at";
const ENCOUNTER_COLUMNS: &str = "id, tenant_id, patient_id, reason, care_plan, opened_at";
const ACT_COLUMNS: &str = "a.id, a.encounter_id, e.tenant_id, a.description, a.price, \
     a.internal_rate, a.external_rate, a.internal_amount, a.external_amount, a.performed_at, \
     a.updated_at";

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<StoredPatient> {
    Ok(StoredPatient {
        id: row.get(0)?,
        tenant_id: tenant_id(row, 1)?,
        full_name: row.get(2)?,
        document: row.get(3)?,
        birth_date: opt_date(row, 4)?,
        clinical_notes: envelope(row, 5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

fn encounter_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEncounter> {
    Ok(StoredEncounter {
        id: row.get(0)?,
        tenant_id: tenant_id(row, 1)?,
        patient_id: row.get(2)?,
        reason: row.get(3)?,
        care_plan: envelope(row, 4)?,
        opened_at: timestamp(row, 5)?,
    })
}

fn act_from_row(row: &Row<'_>) -> rusqlite::Result<MedicalAct> {
    Ok(MedicalAct {
        id: row.get(0)?,
        encounter_id: row.get(1)?,
        tenant_id: tenant_id(row, 2)?,
        description: row.get(3)?,
        price: decimal(row, 4)?,
        internal_rate: decimal(row, 5)?,
        external_rate: decimal(row, 6)?,
        internal_amount: decimal(row, 7)?,
        external_amount: decimal(row, 8)?,
        performed_at: timestamp(row, 9)?,
        updated_at: timestamp(row, 10)?,
    })
}

fn required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingRequiredField {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn not_found(entity: EntityKind, id: &str) -> ResourceError {
    ResourceError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl SqliteUnitOfWork {
    /// Registers a patient and indexes it for search.
    pub fn insert_patient(&mut self, new: NewPatient<Envelope>) -> CoreResult<StoredPatient> {
        self.atomically(|uow| {
            let scoped = uow.scoped(EntityKind::Patient, Operation::Create)?;
            let tenant = scoped.write_tenant()?.clone();
            required("full_name", &new.full_name)?;

            let now = Utc::now();
            let patient = StoredPatient {
                id: new_record_id(),
                tenant_id: tenant,
                full_name: new.full_name.trim().to_string(),
                document: new.document,
                birth_date: new.birth_date,
                clinical_notes: new.clinical_notes,
                created_at: now,
                updated_at: now,
            };
            uow.conn().execute(
                "INSERT INTO patients
                    (id, tenant_id, full_name, document, birth_date, clinical_notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    patient.id,
                    patient.tenant_id.as_str(),
                    patient.full_name,
                    patient.document,
                    patient.birth_date.map(format_date),
                    patient.clinical_notes.as_ref().map(Envelope::as_bytes),
                    format_timestamp(patient.created_at),
                    format_timestamp(patient.updated_at),
                ],
            )?;
            uow.engine.on_patient_indexed(
                &*uow,
                &patient.tenant_id,
                &patient.id,
                &patient.full_name,
                patient.document.as_deref(),
            )?;

            uow.audit(
                &scoped,
                Some(&patient.tenant_id),
                AuditOperation::Create,
                &patient.id,
                None,
                Some(&patient),
            );
            Ok(patient)
        })
    }

    pub fn get_patient(&self, id: &str) -> CoreResult<Option<StoredPatient>> {
        let scoped = self.scoped(EntityKind::Patient, Operation::Read)?;
        self.load_patient(&scoped, id)
    }

    pub fn list_patients(&self) -> CoreResult<Vec<StoredPatient>> {
        let scoped = self.scoped(EntityKind::Patient, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients p
             WHERE (?1 IS NULL OR p.tenant_id = ?1)
             ORDER BY p.full_name, p.id"
        ))?;
        let patients = stmt
            .query_map(params![scoped.tenant_param()], patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    /// Patients with a name or document token starting with `term`.
    pub fn search_patients(&self, term: &str) -> CoreResult<Vec<StoredPatient>> {
        let scoped = self.scoped(EntityKind::Patient, Operation::Search)?;
        let Some(term) = normalize_term(term) else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients p
             WHERE (?2 IS NULL OR p.tenant_id = ?2)
               AND p.id IN (
                   SELECT s.patient_id FROM patient_search s
                   WHERE (?2 IS NULL OR s.tenant_id = ?2)
                     AND substr(s.token, 1, length(?1)) = ?1
               )
             ORDER BY p.full_name, p.id"
        ))?;
        let patients = stmt
            .query_map(params![term, scoped.tenant_param()], patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    /// Applies changes to a patient and rebuilds its search tokens.
    pub fn update_patient(
        &mut self,
        id: &str,
        update: PatientUpdate<Envelope>,
    ) -> CoreResult<StoredPatient> {
        self.atomically(|uow| {
            let scoped = uow.scoped(EntityKind::Patient, Operation::Update)?;
            let before = uow
                .load_patient(&scoped, id)?
                .ok_or_else(|| not_found(EntityKind::Patient, id))?;
            if let Some(name) = &update.full_name {
                required("full_name", name)?;
            }

            let mut after = before.clone();
            if let Some(full_name) = update.full_name {
                after.full_name = full_name.trim().to_string();
            }
            if let Some(document) = update.document {
                after.document = Some(document);
            }
            if let Some(birth_date) = update.birth_date {
                after.birth_date = Some(birth_date);
            }
            if let Some(notes) = update.clinical_notes {
                after.clinical_notes = Some(notes);
            }
            after.updated_at = Utc::now();

            uow.conn().execute(
                "UPDATE patients
                 SET full_name = ?1, document = ?2, birth_date = ?3, clinical_notes = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    after.full_name,
                    after.document,
                    after.birth_date.map(format_date),
                    after.clinical_notes.as_ref().map(Envelope::as_bytes),
                    format_timestamp(after.updated_at),
                    after.id,
                ],
            )?;
            uow.engine.on_patient_indexed(
                &*uow,
                &after.tenant_id,
                &after.id,
                &after.full_name,
                after.document.as_deref(),
            )?;

            uow.audit(
                &scoped,
                Some(&after.tenant_id),
                AuditOperation::Update,
                id,
                Some(&before),
                Some(&after),
            );
            Ok(after)
        })
    }

    fn load_patient(&self, scoped: &ScopedQuery, id: &str) -> CoreResult<Option<StoredPatient>> {
        let patient = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {PATIENT_COLUMNS} FROM patients p
                     WHERE p.id = ?1 AND (?2 IS NULL OR p.tenant_id = ?2)"
                ),
                params![id, scoped.tenant_param()],
                patient_from_row,
            )
            .optional()?;
        Ok(patient)
    }

    /// Opens an encounter for a patient of the caller's tenant.
    pub fn insert_encounter(&mut self, new: NewEncounter<Envelope>) -> CoreResult<StoredEncounter> {
        let scoped = self.scoped(EntityKind::Encounter, Operation::Create)?;
        let tenant = scoped.write_tenant()?.clone();
        required("reason", &new.reason)?;
        self.authorize_reference(EntityKind::Patient, &new.patient_id, &tenant)?;

        let encounter = StoredEncounter {
            id: new_record_id(),
            tenant_id: tenant,
            patient_id: new.patient_id,
            reason: new.reason,
            care_plan: new.care_plan,
            opened_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO encounters (id, tenant_id, patient_id, reason, care_plan, opened_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                encounter.id,
                encounter.tenant_id.as_str(),
                encounter.patient_id,
                encounter.reason,
                encounter.care_plan.as_ref().map(Envelope::as_bytes),
                format_timestamp(encounter.opened_at),
            ],
        )?;

        self.audit(
            &scoped,
            Some(&encounter.tenant_id),
            AuditOperation::Create,
            &encounter.id,
            None,
            Some(&encounter),
        );
        Ok(encounter)
    }

    pub fn get_encounter(&self, id: &str) -> CoreResult<Option<StoredEncounter>> {
        let scoped = self.scoped(EntityKind::Encounter, Operation::Read)?;
        let encounter = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ENCOUNTER_COLUMNS} FROM encounters
                     WHERE id = ?1 AND (?2 IS NULL OR tenant_id = ?2)"
                ),
                params![id, scoped.tenant_param()],
                encounter_from_row,
            )
            .optional()?;
        Ok(encounter)
    }

    /// Encounters, optionally restricted to one patient, oldest first.
    pub fn list_encounters(&self, patient_id: Option<&str>) -> CoreResult<Vec<StoredEncounter>> {
        let scoped = self.scoped(EntityKind::Encounter, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ENCOUNTER_COLUMNS} FROM encounters
             WHERE (?1 IS NULL OR tenant_id = ?1) AND (?2 IS NULL OR patient_id = ?2)
             ORDER BY opened_at, id"
        ))?;
        let encounters = stmt
            .query_map(params![scoped.tenant_param(), patient_id], encounter_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(encounters)
    }

    /// Records a medical act. Commission amounts are derived here; any
    /// amounts supplied on `new` are ignored.
    pub fn insert_medical_act(&mut self, new: &NewMedicalAct) -> CoreResult<MedicalAct> {
        let scoped = self.scoped(EntityKind::MedicalAct, Operation::Create)?;
        let tenant = self.resolve_parent(&scoped, &new.encounter_id)?;
        required("description", &new.description)?;

        let commission = self.engine.on_act_persisted(ActPricing {
            price: new.price,
            internal_rate: new.internal_rate,
            external_rate: new.external_rate,
        })?;

        let now = Utc::now();
        let act = MedicalAct {
            id: new_record_id(),
            encounter_id: new.encounter_id.clone(),
            tenant_id: tenant,
            description: new.description.clone(),
            price: new.price,
            internal_rate: new.internal_rate,
            external_rate: new.external_rate,
            internal_amount: commission.internal,
            external_amount: commission.external,
            performed_at: now,
            updated_at: now,
        };
        self.conn().execute(
            "INSERT INTO medical_acts
                (id, encounter_id, description, price, internal_rate, external_rate,
                 internal_amount, external_amount, performed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                act.id,
                act.encounter_id,
                act.description,
                act.price.to_string(),
                act.internal_rate.to_string(),
                act.external_rate.to_string(),
                act.internal_amount.to_string(),
                act.external_amount.to_string(),
                format_timestamp(act.performed_at),
                format_timestamp(act.updated_at),
            ],
        )?;

        self.audit(
            &scoped,
            Some(&act.tenant_id),
            AuditOperation::Create,
            &act.id,
            None,
            Some(&act),
        );
        Ok(act)
    }

    /// Changes a medical act, re-deriving its commission amounts.
    pub fn update_medical_act(&mut self, id: &str, update: &MedicalActUpdate) -> CoreResult<MedicalAct> {
        let scoped = self.scoped(EntityKind::MedicalAct, Operation::Update)?;
        let before = self
            .load_medical_act(&scoped, id)?
            .ok_or_else(|| not_found(EntityKind::MedicalAct, id))?;
        if let Some(description) = &update.description {
            required("description", description)?;
        }

        let mut after = before.clone();
        if let Some(description) = &update.description {
            after.description = description.clone();
        }
        after.price = update.price.unwrap_or(before.price);
        after.internal_rate = update.internal_rate.unwrap_or(before.internal_rate);
        after.external_rate = update.external_rate.unwrap_or(before.external_rate);

        let commission = self.engine.on_act_persisted(ActPricing {
            price: after.price,
            internal_rate: after.internal_rate,
            external_rate: after.external_rate,
        })?;
        after.internal_amount = commission.internal;
        after.external_amount = commission.external;
        after.updated_at = Utc::now();

        self.conn().execute(
            "UPDATE medical_acts
             SET description = ?1, price = ?2, internal_rate = ?3, external_rate = ?4,
                 internal_amount = ?5, external_amount = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                after.description,
                after.price.to_string(),
                after.internal_rate.to_string(),
                after.external_rate.to_string(),
                after.internal_amount.to_string(),
                after.external_amount.to_string(),
                format_timestamp(after.updated_at),
                after.id,
            ],
        )?;

        self.audit(
            &scoped,
            Some(&after.tenant_id),
            AuditOperation::Update,
            id,
            Some(&before),
            Some(&after),
        );
        Ok(after)
    }

    pub fn get_medical_act(&self, id: &str) -> CoreResult<Option<MedicalAct>> {
        let scoped = self.scoped(EntityKind::MedicalAct, Operation::Read)?;
        self.load_medical_act(&scoped, id)
    }

    pub fn list_medical_acts(&self, encounter_id: &str) -> CoreResult<Vec<MedicalAct>> {
        let scoped = self.scoped(EntityKind::MedicalAct, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ACT_COLUMNS} FROM medical_acts a
             JOIN encounters e ON e.id = a.encounter_id
             WHERE a.encounter_id = ?1 AND (?2 IS NULL OR e.tenant_id = ?2)
             ORDER BY a.performed_at, a.id"
        ))?;
        let acts = stmt
            .query_map(params![encounter_id, scoped.tenant_param()], act_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(acts)
    }

    fn load_medical_act(&self, scoped: &ScopedQuery, id: &str) -> CoreResult<Option<MedicalAct>> {
        let act = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ACT_COLUMNS} FROM medical_acts a
                     JOIN encounters e ON e.id = a.encounter_id
                     WHERE a.id = ?1 AND (?2 IS NULL OR e.tenant_id = ?2)"
                ),
                params![id, scoped.tenant_param()],
                act_from_row,
            )
            .optional()?;
        Ok(act)
    }
}
