//! Invoices and invoice lines.
//!
//! Every line mutation recomputes the parent invoice total from all of its
//! surviving lines before the method returns. The line write and the total
//! share one savepoint: if the recompute fails, the line is undone too.

use chrono::Utc;
use rust_decimal::Decimal;
use rusqlite::{OptionalExtension, Row, params};

use crate::audit::AuditOperation;
use crate::consistency::{line_total, validate_line};
use crate::error::{CoreResult, ResourceError, ValidationError};
use crate::tenant::{EntityKind, Operation, ScopedQuery};
use crate::types::{Invoice, InvoiceLine, InvoiceLineUpdate, NewInvoice, NewInvoiceLine, new_record_id};

use super::super::rows::{decimal, format_timestamp, tenant_id, timestamp};
use super::super::SqliteUnitOfWork;

const INVOICE_COLUMNS: &str = "id, tenant_id, patient_id, total, created_at, updated_at";
const LINE_COLUMNS: &str =
    "l.id, l.invoice_id, i.tenant_id, l.description, l.quantity, l.unit_price, l.line_total";

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        tenant_id: tenant_id(row, 1)?,
        patient_id: row.get(2)?,
        total: decimal(row, 3)?,
        created_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
    })
}

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<InvoiceLine> {
    Ok(InvoiceLine {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        tenant_id: tenant_id(row, 2)?,
        description: row.get(3)?,
        quantity: decimal(row, 4)?,
        unit_price: decimal(row, 5)?,
        line_total: decimal(row, 6)?,
    })
}

fn not_found(entity: EntityKind, id: &str) -> ResourceError {
    ResourceError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl SqliteUnitOfWork {
    /// Opens an empty invoice for a patient of the caller's tenant.
    pub fn insert_invoice(&mut self, new: &NewInvoice) -> CoreResult<Invoice> {
        let scoped = self.scoped(EntityKind::Invoice, Operation::Create)?;
        let tenant = scoped.write_tenant()?.clone();
        self.authorize_reference(EntityKind::Patient, &new.patient_id, &tenant)?;

        let now = Utc::now();
        let invoice = Invoice {
            id: new_record_id(),
            tenant_id: tenant,
            patient_id: new.patient_id.clone(),
            total: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        self.conn().execute(
            "INSERT INTO invoices (id, tenant_id, patient_id, total, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                invoice.id,
                invoice.tenant_id.as_str(),
                invoice.patient_id,
                invoice.total.to_string(),
                format_timestamp(invoice.created_at),
                format_timestamp(invoice.updated_at),
            ],
        )?;

        self.audit(
            &scoped,
            Some(&invoice.tenant_id),
            AuditOperation::Create,
            &invoice.id,
            None,
            Some(&invoice),
        );
        Ok(invoice)
    }

    pub fn get_invoice(&self, id: &str) -> CoreResult<Option<Invoice>> {
        let scoped = self.scoped(EntityKind::Invoice, Operation::Read)?;
        self.load_invoice(scoped.tenant_param(), id)
    }

    /// Invoices, optionally restricted to one patient, oldest first.
    pub fn list_invoices(&self, patient_id: Option<&str>) -> CoreResult<Vec<Invoice>> {
        let scoped = self.scoped(EntityKind::Invoice, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE (?1 IS NULL OR tenant_id = ?1) AND (?2 IS NULL OR patient_id = ?2)
             ORDER BY created_at, id"
        ))?;
        let invoices = stmt
            .query_map(params![scoped.tenant_param(), patient_id], invoice_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(invoices)
    }

    /// Adds a line to an invoice and recomputes the total.
    pub fn insert_invoice_line(&mut self, new: &NewInvoiceLine) -> CoreResult<InvoiceLine> {
        self.atomically(|uow| {
            let scoped = uow.scoped(EntityKind::InvoiceLine, Operation::Create)?;
            let tenant = uow.resolve_parent(&scoped, &new.invoice_id)?;
            if new.description.trim().is_empty() {
                return Err(ValidationError::MissingRequiredField {
                    field: "description".to_string(),
                }
                .into());
            }
            validate_line(new.quantity, new.unit_price)?;

            let line = InvoiceLine {
                id: new_record_id(),
                invoice_id: new.invoice_id.clone(),
                tenant_id: tenant.clone(),
                description: new.description.clone(),
                quantity: new.quantity,
                unit_price: new.unit_price,
                line_total: line_total(new.quantity, new.unit_price)?,
            };
            uow.conn().execute(
                "INSERT INTO invoice_lines (id, invoice_id, description, quantity, unit_price, line_total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    line.id,
                    line.invoice_id,
                    line.description,
                    line.quantity.to_string(),
                    line.unit_price.to_string(),
                    line.line_total.to_string(),
                ],
            )?;

            uow.audit(
                &scoped,
                Some(&tenant),
                AuditOperation::Create,
                &line.id,
                None,
                Some(&line),
            );
            uow.refresh_invoice_total(&scoped, &line.invoice_id)?;
            Ok(line)
        })
    }

    /// Changes an invoice line and recomputes the total.
    pub fn update_invoice_line(
        &mut self,
        id: &str,
        update: &InvoiceLineUpdate,
    ) -> CoreResult<InvoiceLine> {
        self.atomically(|uow| {
            let scoped = uow.scoped(EntityKind::InvoiceLine, Operation::Update)?;
            let before = uow
                .load_invoice_line(&scoped, id)?
                .ok_or_else(|| not_found(EntityKind::InvoiceLine, id))?;

            let mut after = before.clone();
            if let Some(description) = &update.description {
                after.description = description.clone();
            }
            after.quantity = update.quantity.unwrap_or(before.quantity);
            after.unit_price = update.unit_price.unwrap_or(before.unit_price);
            validate_line(after.quantity, after.unit_price)?;
            after.line_total = line_total(after.quantity, after.unit_price)?;

            uow.conn().execute(
                "UPDATE invoice_lines
                 SET description = ?1, quantity = ?2, unit_price = ?3, line_total = ?4
                 WHERE id = ?5",
                params![
                    after.description,
                    after.quantity.to_string(),
                    after.unit_price.to_string(),
                    after.line_total.to_string(),
                    after.id,
                ],
            )?;

            let tenant = after.tenant_id.clone();
            uow.audit(
                &scoped,
                Some(&tenant),
                AuditOperation::Update,
                id,
                Some(&before),
                Some(&after),
            );
            uow.refresh_invoice_total(&scoped, &after.invoice_id)?;
            Ok(after)
        })
    }

    /// Removes an invoice line and returns the recomputed invoice.
    pub fn delete_invoice_line(&mut self, id: &str) -> CoreResult<Invoice> {
        self.atomically(|uow| {
            let scoped = uow.scoped(EntityKind::InvoiceLine, Operation::Delete)?;
            let before = uow
                .load_invoice_line(&scoped, id)?
                .ok_or_else(|| not_found(EntityKind::InvoiceLine, id))?;

            uow.conn()
                .execute("DELETE FROM invoice_lines WHERE id = ?1", params![id])?;

            let tenant = before.tenant_id.clone();
            uow.audit(
                &scoped,
                Some(&tenant),
                AuditOperation::Delete,
                id,
                Some(&before),
                None,
            );
            uow.refresh_invoice_total(&scoped, &before.invoice_id)
        })
    }

    pub fn list_invoice_lines(&self, invoice_id: &str) -> CoreResult<Vec<InvoiceLine>> {
        let scoped = self.scoped(EntityKind::InvoiceLine, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LINE_COLUMNS} FROM invoice_lines l
             JOIN invoices i ON i.id = l.invoice_id
             WHERE l.invoice_id = ?1 AND (?2 IS NULL OR i.tenant_id = ?2)
             ORDER BY l.rowid"
        ))?;
        let lines = stmt
            .query_map(params![invoice_id, scoped.tenant_param()], line_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// Re-derives an invoice total from storage and audits the change.
    ///
    /// Line mutations do this themselves; call it on its own to repair a
    /// total. Running it twice without intervening writes changes nothing.
    pub fn recompute_invoice(&mut self, invoice_id: &str) -> CoreResult<Invoice> {
        let scoped = self.scoped(EntityKind::Invoice, Operation::Update)?;
        self.atomically(|uow| uow.refresh_invoice_total(&scoped, invoice_id))
    }

    /// Writes the derived total of an invoice under the scope of the write
    /// that invalidated it.
    fn refresh_invoice_total(&mut self, trigger: &ScopedQuery, invoice_id: &str) -> CoreResult<Invoice> {
        let scoped = trigger.derived(EntityKind::Invoice);
        let before = self
            .load_invoice(scoped.tenant_param(), invoice_id)?
            .ok_or_else(|| not_found(EntityKind::Invoice, invoice_id))?;

        let total = self.engine.on_line_item_changed(&*self, invoice_id)?;
        if total == before.total {
            return Ok(before);
        }
        let after = self
            .load_invoice(scoped.tenant_param(), invoice_id)?
            .ok_or_else(|| not_found(EntityKind::Invoice, invoice_id))?;

        self.audit(
            &scoped,
            Some(&before.tenant_id),
            AuditOperation::Update,
            invoice_id,
            Some(&before),
            Some(&after),
        );
        Ok(after)
    }

    fn load_invoice(&self, tenant: Option<&str>, id: &str) -> CoreResult<Option<Invoice>> {
        let invoice = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices
                     WHERE id = ?1 AND (?2 IS NULL OR tenant_id = ?2)"
                ),
                params![id, tenant],
                invoice_from_row,
            )
            .optional()?;
        Ok(invoice)
    }

    fn load_invoice_line(&self, scoped: &ScopedQuery, id: &str) -> CoreResult<Option<InvoiceLine>> {
        let line = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {LINE_COLUMNS} FROM invoice_lines l
                     JOIN invoices i ON i.id = l.invoice_id
                     WHERE l.id = ?1 AND (?2 IS NULL OR i.tenant_id = ?2)"
                ),
                params![id, scoped.tenant_param()],
                line_from_row,
            )
            .optional()?;
        Ok(line)
    }
}
