//! [`AggregateStore`] on the open transaction.
//!
//! These statements run inside a repository method that has already scoped
//! the access, so they address rows by primary key only.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use rust_decimal::Decimal;

use crate::consistency::{AggregateStore, BookedSlot};
use crate::error::CoreResult;
use crate::tenant::TenantId;

use super::super::rows::{decimal, format_timestamp, timestamp};
use super::super::SqliteUnitOfWork;

impl AggregateStore for SqliteUnitOfWork {
    fn line_amounts(&self, invoice_id: &str) -> CoreResult<Vec<(Decimal, Decimal)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT quantity, unit_price FROM invoice_lines WHERE invoice_id = ?1")?;
        let amounts = stmt
            .query_map(params![invoice_id], |row| Ok((decimal(row, 0)?, decimal(row, 1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(amounts)
    }

    fn write_invoice_total(&self, invoice_id: &str, total: Decimal) -> CoreResult<()> {
        // An unchanged total keeps its timestamp.
        let current = self
            .conn()
            .query_row(
                "SELECT total FROM invoices WHERE id = ?1",
                params![invoice_id],
                |row| decimal(row, 0),
            )
            .optional()?;
        if current == Some(total) {
            return Ok(());
        }
        self.conn().execute(
            "UPDATE invoices SET total = ?1, updated_at = ?2 WHERE id = ?3",
            params![total.to_string(), format_timestamp(Utc::now()), invoice_id],
        )?;
        Ok(())
    }

    fn current_stock(&self, item_id: &str) -> CoreResult<Option<i64>> {
        let stock = self
            .conn()
            .query_row(
                "SELECT stock FROM inventory_items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stock)
    }

    fn write_stock(&self, item_id: &str, stock: i64) -> CoreResult<()> {
        self.conn().execute(
            "UPDATE inventory_items SET stock = ?1, updated_at = ?2 WHERE id = ?3",
            params![stock, format_timestamp(Utc::now()), item_id],
        )?;
        Ok(())
    }

    fn replace_search_tokens(
        &self,
        tenant_id: &TenantId,
        patient_id: &str,
        tokens: &[String],
    ) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM patient_search WHERE patient_id = ?1",
            params![patient_id],
        )?;
        let mut insert = conn.prepare(
            "INSERT OR IGNORE INTO patient_search (tenant_id, patient_id, token) VALUES (?1, ?2, ?3)",
        )?;
        for token in tokens {
            insert.execute(params![tenant_id.as_str(), patient_id, token])?;
        }
        Ok(())
    }

    fn booked_slots(
        &self,
        tenant_id: &TenantId,
        practitioner_id: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> CoreResult<Vec<BookedSlot>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, starts_at, ends_at FROM appointments
             WHERE tenant_id = ?1 AND practitioner_id = ?2 AND status = 'booked'
               AND starts_at < ?4 AND ends_at > ?3",
        )?;
        let slots = stmt
            .query_map(
                params![
                    tenant_id.as_str(),
                    practitioner_id,
                    format_timestamp(starts_at),
                    format_timestamp(ends_at),
                ],
                |row| {
                    Ok(BookedSlot {
                        appointment_id: row.get(0)?,
                        starts_at: timestamp(row, 1)?,
                        ends_at: timestamp(row, 2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }
}
