//! Practitioner appointments.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use crate::audit::AuditOperation;
use crate::error::{CoreResult, ResourceError, ValidationError};
use crate::tenant::{EntityKind, Operation, ScopedQuery};
use crate::types::{Appointment, AppointmentStatus, NewAppointment, new_record_id};

use super::super::rows::{format_timestamp, parsed, tenant_id, timestamp};
use super::super::SqliteUnitOfWork;

const APPOINTMENT_COLUMNS: &str =
    "id, tenant_id, patient_id, practitioner_id, starts_at, ends_at, status, created_at";

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        tenant_id: tenant_id(row, 1)?,
        patient_id: row.get(2)?,
        practitioner_id: row.get(3)?,
        starts_at: timestamp(row, 4)?,
        ends_at: timestamp(row, 5)?,
        status: parsed(row, 6, AppointmentStatus::parse)?,
        created_at: timestamp(row, 7)?,
    })
}

impl SqliteUnitOfWork {
    /// Books a slot, refusing one that overlaps another booking of the same
    /// practitioner.
    pub fn book_appointment(&mut self, new: &NewAppointment) -> CoreResult<Appointment> {
        let scoped = self.scoped(EntityKind::Appointment, Operation::Create)?;
        let tenant = scoped.write_tenant()?.clone();
        if new.practitioner_id.trim().is_empty() {
            return Err(ValidationError::MissingRequiredField {
                field: "practitioner_id".to_string(),
            }
            .into());
        }
        self.authorize_reference(EntityKind::Patient, &new.patient_id, &tenant)?;
        self.engine.on_appointment_booked(
            &*self,
            &tenant,
            &new.practitioner_id,
            new.starts_at,
            new.ends_at,
        )?;

        let appointment = Appointment {
            id: new_record_id(),
            tenant_id: tenant,
            patient_id: new.patient_id.clone(),
            practitioner_id: new.practitioner_id.clone(),
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            status: AppointmentStatus::Booked,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO appointments
                (id, tenant_id, patient_id, practitioner_id, starts_at, ends_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                appointment.id,
                appointment.tenant_id.as_str(),
                appointment.patient_id,
                appointment.practitioner_id,
                format_timestamp(appointment.starts_at),
                format_timestamp(appointment.ends_at),
                appointment.status.as_str(),
                format_timestamp(appointment.created_at),
            ],
        )?;

        self.audit(
            &scoped,
            Some(&appointment.tenant_id),
            AuditOperation::Create,
            &appointment.id,
            None,
            Some(&appointment),
        );
        Ok(appointment)
    }

    /// Cancels an appointment, freeing its slot.
    pub fn cancel_appointment(&mut self, id: &str) -> CoreResult<Appointment> {
        let scoped = self.scoped(EntityKind::Appointment, Operation::Update)?;
        let before = self
            .load_appointment(&scoped, id)?
            .ok_or_else(|| ResourceError::NotFound {
                entity: EntityKind::Appointment,
                id: id.to_string(),
            })?;
        if before.status == AppointmentStatus::Cancelled {
            return Ok(before);
        }

        self.conn().execute(
            "UPDATE appointments SET status = ?1 WHERE id = ?2",
            params![AppointmentStatus::Cancelled.as_str(), id],
        )?;
        let after = Appointment {
            status: AppointmentStatus::Cancelled,
            ..before.clone()
        };

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

    pub fn get_appointment(&self, id: &str) -> CoreResult<Option<Appointment>> {
        let scoped = self.scoped(EntityKind::Appointment, Operation::Read)?;
        self.load_appointment(&scoped, id)
    }

    /// Appointments, optionally for one practitioner, in start order.
    pub fn list_appointments(&self, practitioner_id: Option<&str>) -> CoreResult<Vec<Appointment>> {
        let scoped = self.scoped(EntityKind::Appointment, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments
             WHERE (?1 IS NULL OR tenant_id = ?1) AND (?2 IS NULL OR practitioner_id = ?2)
             ORDER BY starts_at, id"
        ))?;
        let appointments = stmt
            .query_map(params![scoped.tenant_param(), practitioner_id], appointment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(appointments)
    }

    fn load_appointment(&self, scoped: &ScopedQuery, id: &str) -> CoreResult<Option<Appointment>> {
        let appointment = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                     WHERE id = ?1 AND (?2 IS NULL OR tenant_id = ?2)"
                ),
                params![id, scoped.tenant_param()],
                appointment_from_row,
            )
            .optional()?;
        Ok(appointment)
    }
}
