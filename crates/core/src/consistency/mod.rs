//! Consistency engine.
//!
//! Derived values are recomputed by the core itself, inside the same unit of
//! work as the write that invalidates them:
//!
//! | Trigger | Derived value |
//! |---|---|
//! | invoice line inserted, updated or deleted | invoice `total` |
//! | medical act inserted or updated | commission amounts |
//! | inventory ledger entry inserted | item `stock` |
//! | patient inserted or updated | patient search tokens |
//! | appointment booked | practitioner slot is free |
//!
//! The engine talks to storage through [`AggregateStore`], which the SQLite
//! unit of work implements on its open transaction.

mod commission;
mod invoice;
mod schedule;
mod search_index;
mod stock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

pub use commission::{ActPricing, CommissionAmounts, derive_commission};
pub use invoice::{invoice_total, line_total, round_money, validate_line};
pub use schedule::{overlaps, validate_slot};
pub use search_index::{normalize_term, patient_tokens};
pub use stock::apply_movement;

use crate::error::{ConsistencyError, CoreResult, ResourceError};
use crate::tenant::{EntityKind, TenantId};
use crate::types::MovementDirection;

/// A booked slot, as returned by [`AggregateStore::booked_slots`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookedSlot {
    pub appointment_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Storage operations the engine needs, all running inside the caller's
/// open unit of work.
pub trait AggregateStore {
    /// `(quantity, unit_price)` of every line currently on the invoice.
    fn line_amounts(&self, invoice_id: &str) -> CoreResult<Vec<(Decimal, Decimal)>>;

    fn write_invoice_total(&self, invoice_id: &str, total: Decimal) -> CoreResult<()>;

    /// Current stock of an item, or `None` if it does not exist.
    fn current_stock(&self, item_id: &str) -> CoreResult<Option<i64>>;

    fn write_stock(&self, item_id: &str, stock: i64) -> CoreResult<()>;

    /// Replaces every search token of a patient.
    fn replace_search_tokens(
        &self,
        tenant_id: &TenantId,
        patient_id: &str,
        tokens: &[String],
    ) -> CoreResult<()>;

    /// Non-cancelled appointments of a practitioner that may collide with
    /// the given window.
    fn booked_slots(
        &self,
        tenant_id: &TenantId,
        practitioner_id: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> CoreResult<Vec<BookedSlot>>;
}

/// Recomputes derived values on the write path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyEngine;

impl ConsistencyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Recomputes an invoice total from all of its surviving lines.
    ///
    /// Idempotent: running it twice without intervening writes yields the
    /// same total.
    pub fn on_line_item_changed<S>(&self, store: &S, invoice_id: &str) -> CoreResult<Decimal>
    where
        S: AggregateStore + ?Sized,
    {
        let total = invoice_total(store.line_amounts(invoice_id)?)?;
        store.write_invoice_total(invoice_id, total)?;
        debug!(invoice_id, %total, "recomputed invoice total");
        Ok(total)
    }

    /// Derives commission amounts for an act about to be written.
    ///
    /// Runs before the row is persisted, so a stored act always carries
    /// amounts consistent with its price and rates.
    pub fn on_act_persisted(&self, pricing: ActPricing) -> CoreResult<CommissionAmounts> {
        Ok(derive_commission(pricing)?)
    }

    /// Applies a ledger movement to the item's stock.
    ///
    /// Must run before the ledger row is inserted: a refused movement leaves
    /// neither the ledger nor the stock changed.
    pub fn on_ledger_entry_inserted<S>(
        &self,
        store: &S,
        item_id: &str,
        direction: MovementDirection,
        quantity: i64,
    ) -> CoreResult<i64>
    where
        S: AggregateStore + ?Sized,
    {
        let current = store
            .current_stock(item_id)?
            .ok_or_else(|| ResourceError::NotFound {
                entity: EntityKind::InventoryItem,
                id: item_id.to_string(),
            })?;
        let next = apply_movement(item_id, current, direction, quantity)?;
        store.write_stock(item_id, next)?;
        debug!(item_id, %direction, quantity, stock = next, "applied stock movement");
        Ok(next)
    }

    /// Rebuilds the search tokens of a patient.
    pub fn on_patient_indexed<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        patient_id: &str,
        full_name: &str,
        document: Option<&str>,
    ) -> CoreResult<usize>
    where
        S: AggregateStore + ?Sized,
    {
        let tokens = patient_tokens(full_name, document);
        store.replace_search_tokens(tenant_id, patient_id, &tokens)?;
        Ok(tokens.len())
    }

    /// Refuses a booking that collides with another of the practitioner's
    /// appointments.
    pub fn on_appointment_booked<S>(
        &self,
        store: &S,
        tenant_id: &TenantId,
        practitioner_id: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> CoreResult<()>
    where
        S: AggregateStore + ?Sized,
    {
        validate_slot(starts_at, ends_at)?;
        let collision = store
            .booked_slots(tenant_id, practitioner_id, starts_at, ends_at)?
            .into_iter()
            .find(|slot| overlaps((slot.starts_at, slot.ends_at), (starts_at, ends_at)));
        if let Some(slot) = collision {
            return Err(ConsistencyError::DoubleBooked {
                practitioner_id: practitioner_id.to_string(),
                conflicting_id: slot.appointment_id,
            }
            .into());
        }
        Ok(())
    }
}
