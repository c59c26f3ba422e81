//! Inventory items and the append-only movement ledger.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use crate::audit::AuditOperation;
use crate::error::{ConsistencyError, CoreResult, ResourceError, ValidationError};
use crate::tenant::{EntityKind, Operation, ScopedQuery};
use crate::types::{InventoryItem, LedgerEntry, MovementDirection, NewInventoryItem, NewLedgerEntry, new_record_id};

use super::super::rows::{format_timestamp, parsed, principal_id, tenant_id, timestamp};
use super::super::SqliteUnitOfWork;

const ITEM_COLUMNS: &str = "id, tenant_id, sku, name, stock, updated_at";
const LEDGER_COLUMNS: &str = "t.id, t.item_id, i.tenant_id, t.direction, t.quantity, t.reason, \
     t.principal_id, t.created_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get(0)?,
        tenant_id: tenant_id(row, 1)?,
        sku: row.get(2)?,
        name: row.get(3)?,
        stock: row.get(4)?,
        updated_at: timestamp(row, 5)?,
    })
}

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        item_id: row.get(1)?,
        tenant_id: tenant_id(row, 2)?,
        direction: parsed(row, 3, MovementDirection::parse)?,
        quantity: row.get(4)?,
        reason: row.get(5)?,
        principal_id: principal_id(row, 6)?,
        created_at: timestamp(row, 7)?,
    })
}

impl SqliteUnitOfWork {
    /// Creates an item with zero stock. SKUs are unique per tenant.
    pub fn insert_inventory_item(&mut self, new: &NewInventoryItem) -> CoreResult<InventoryItem> {
        let scoped = self.scoped(EntityKind::InventoryItem, Operation::Create)?;
        let tenant = scoped.write_tenant()?.clone();
        for (field, value) in [("sku", &new.sku), ("name", &new.name)] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingRequiredField {
                    field: field.to_string(),
                }
                .into());
            }
        }

        let taken = self
            .conn()
            .query_row(
                "SELECT 1 FROM inventory_items WHERE tenant_id = ?1 AND sku = ?2",
                params![tenant.as_str(), new.sku],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if taken {
            return Err(ResourceError::AlreadyExists {
                entity: EntityKind::InventoryItem,
                id: new.sku.clone(),
            }
            .into());
        }

        let item = InventoryItem {
            id: new_record_id(),
            tenant_id: tenant,
            sku: new.sku.clone(),
            name: new.name.clone(),
            stock: 0,
            updated_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO inventory_items (id, tenant_id, sku, name, stock, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                item.id,
                item.tenant_id.as_str(),
                item.sku,
                item.name,
                format_timestamp(item.updated_at),
            ],
        )?;

        self.audit(
            &scoped,
            Some(&item.tenant_id),
            AuditOperation::Create,
            &item.id,
            None,
            Some(&item),
        );
        Ok(item)
    }

    pub fn get_inventory_item(&self, id: &str) -> CoreResult<Option<InventoryItem>> {
        let scoped = self.scoped(EntityKind::InventoryItem, Operation::Read)?;
        self.load_inventory_item(&scoped, id)
    }

    pub fn list_inventory_items(&self) -> CoreResult<Vec<InventoryItem>> {
        let scoped = self.scoped(EntityKind::InventoryItem, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items
             WHERE (?1 IS NULL OR tenant_id = ?1) ORDER BY sku, id"
        ))?;
        let items = stmt
            .query_map(params![scoped.tenant_param()], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Appends a stock movement and applies it to the item.
    ///
    /// The stock check runs first: a refused outbound movement leaves both the
    /// ledger and the stock untouched. The stock write and the ledger row
    /// share one savepoint, so a failed append undoes the stock change.
    pub fn append_ledger_entry(&mut self, new: &NewLedgerEntry) -> CoreResult<LedgerEntry> {
        self.atomically(|uow| {
            let scoped = uow.scoped(EntityKind::InventoryTransaction, Operation::Create)?;
            let tenant = uow.resolve_parent(&scoped, &new.item_id)?;
            if new.quantity <= 0 {
                return Err(ConsistencyError::InvalidQuantity {
                    field: "quantity".to_string(),
                    value: new.quantity.to_string(),
                }
                .into());
            }

            let item_scope = scoped.derived(EntityKind::InventoryItem);
            let before = uow
                .load_inventory_item(&item_scope, &new.item_id)?
                .ok_or_else(|| ResourceError::NotFound {
                    entity: EntityKind::InventoryItem,
                    id: new.item_id.clone(),
                })?;

            let stock = uow.engine.on_ledger_entry_inserted(
                &*uow,
                &new.item_id,
                new.direction,
                new.quantity,
            )?;

            let entry = LedgerEntry {
                id: new_record_id(),
                item_id: new.item_id.clone(),
                tenant_id: tenant.clone(),
                direction: new.direction,
                quantity: new.quantity,
                reason: new.reason.clone(),
                principal_id: scoped.principal_id().clone(),
                created_at: Utc::now(),
            };
            uow.conn().execute(
                "INSERT INTO inventory_transactions
                    (id, item_id, direction, quantity, reason, principal_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id,
                    entry.item_id,
                    entry.direction.as_str(),
                    entry.quantity,
                    entry.reason,
                    entry.principal_id.as_str(),
                    format_timestamp(entry.created_at),
                ],
            )?;

            uow.audit(
                &scoped,
                Some(&tenant),
                AuditOperation::Create,
                &entry.id,
                None,
                Some(&entry),
            );
            let after = uow
                .load_inventory_item(&item_scope, &new.item_id)?
                .unwrap_or_else(|| InventoryItem {
                    stock,
                    ..before.clone()
                });
            uow.audit(
                &item_scope,
                Some(&tenant),
                AuditOperation::Update,
                &new.item_id,
                Some(&before),
                Some(&after),
            );
            Ok(entry)
        })
    }

    /// Ledger entries of an item, oldest first.
    pub fn list_ledger_entries(&self, item_id: &str) -> CoreResult<Vec<LedgerEntry>> {
        let scoped = self.scoped(EntityKind::InventoryTransaction, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LEDGER_COLUMNS} FROM inventory_transactions t
             JOIN inventory_items i ON i.id = t.item_id
             WHERE t.item_id = ?1 AND (?2 IS NULL OR i.tenant_id = ?2)
             ORDER BY t.created_at, t.rowid"
        ))?;
        let entries = stmt
            .query_map(params![item_id, scoped.tenant_param()], ledger_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Signed sum of an item's ledger. Always equals its stock.
    pub fn ledger_balance(&self, item_id: &str) -> CoreResult<i64> {
        let scoped = self.scoped(EntityKind::InventoryTransaction, Operation::Read)?;
        let balance: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(CASE t.direction WHEN 'inbound' THEN t.quantity ELSE -t.quantity END), 0)
             FROM inventory_transactions t
             JOIN inventory_items i ON i.id = t.item_id
             WHERE t.item_id = ?1 AND (?2 IS NULL OR i.tenant_id = ?2)",
            params![item_id, scoped.tenant_param()],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    fn load_inventory_item(&self, scoped: &ScopedQuery, id: &str) -> CoreResult<Option<InventoryItem>> {
        let item = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM inventory_items
                     WHERE id = ?1 AND (?2 IS NULL OR tenant_id = ?2)"
                ),
                params![id, scoped.tenant_param()],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }
}
