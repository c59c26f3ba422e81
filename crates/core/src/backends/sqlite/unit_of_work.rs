//! Units of work for the SQLite backend.

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::{AuditOperation, AuditRecorder, snapshot};
use crate::consistency::ConsistencyEngine;
use crate::error::{BackendError, CoreResult, ResourceError, TenantError, TransactionError};
use crate::tenant::{
    EntityKind, IsolationEnforcer, Operation, ScopedQuery, TenancyModel, TenantContext, TenantId,
};

use super::repo::SavepointSink;

/// How a unit of work locks the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    /// Takes the write lock up front (`BEGIN IMMEDIATE`), so concurrent
    /// writers are serialized before they read anything.
    ReadWrite,
    /// Deferred transaction; any write is refused.
    ReadOnly,
}

/// Summary of a committed unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Audit entries written.
    pub audit_recorded: usize,
    /// Audit entries that could not be written.
    pub audit_degraded: usize,
}

impl CommitReport {
    pub fn is_degraded(&self) -> bool {
        self.audit_degraded > 0
    }
}

/// One atomic unit of work on an owned pooled connection.
///
/// Every operation is scoped by the [`IsolationEnforcer`] against the
/// context the unit was opened with; the tenant filter is bound into each
/// statement as a parameter. Derived values are recomputed by the
/// [`ConsistencyEngine`] in the same transaction as the write that
/// invalidates them.
///
/// Nothing is visible to other connections until [`commit`](Self::commit).
/// Dropping an uncommitted unit rolls it back. A mutation that fails part
/// way is undone to its savepoint, so only whole mutations are ever
/// committed.
pub struct SqliteUnitOfWork {
    conn: PooledConnection<SqliteConnectionManager>,
    context: Option<TenantContext>,
    mode: UnitMode,
    pub(crate) enforcer: IsolationEnforcer,
    pub(crate) engine: ConsistencyEngine,
    recorder: AuditRecorder,
    active: bool,
    poisoned: bool,
    audit_recorded: usize,
    audit_degraded: usize,
}

impl std::fmt::Debug for SqliteUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUnitOfWork")
            .field("mode", &self.mode)
            .field("active", &self.active)
            .field("poisoned", &self.poisoned)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl SqliteUnitOfWork {
    pub(crate) fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        context: Option<TenantContext>,
        mode: UnitMode,
    ) -> CoreResult<Self> {
        let statement = match mode {
            UnitMode::ReadWrite => "BEGIN IMMEDIATE",
            UnitMode::ReadOnly => "BEGIN DEFERRED",
        };
        conn.execute_batch(statement).map_err(|e| TransactionError::RolledBack {
            reason: format!("failed to begin transaction: {e}"),
        })?;

        Ok(Self {
            conn,
            context,
            mode,
            enforcer: IsolationEnforcer::new(),
            engine: ConsistencyEngine::new(),
            recorder: AuditRecorder::new(),
            active: true,
            poisoned: false,
            audit_recorded: 0,
            audit_degraded: 0,
        })
    }

    /// The context this unit was opened with.
    pub fn context(&self) -> Option<&TenantContext> {
        self.context.as_ref()
    }

    pub fn mode(&self) -> UnitMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Scopes one data access. Every repository method starts here.
    pub(crate) fn scoped(&self, entity: EntityKind, operation: Operation) -> CoreResult<ScopedQuery> {
        let scoped = self
            .enforcer
            .enforce(self.context.as_ref(), entity, operation)?;
        if operation.is_write() && self.mode == UnitMode::ReadOnly {
            return Err(TransactionError::InvalidTransaction.into());
        }
        if let Some(context) = &self.context {
            context.check_deadline()?;
        }
        Ok(scoped)
    }

    /// Owning tenant of a tenant-owned or child record, `None` if it does not
    /// exist. Bypasses scoping; callers authorize the result.
    pub(crate) fn owner_of(&self, entity: EntityKind, id: &str) -> CoreResult<Option<TenantId>> {
        let sql = match entity {
            EntityKind::Patient => "SELECT tenant_id FROM patients WHERE id = ?1",
            EntityKind::Encounter => "SELECT tenant_id FROM encounters WHERE id = ?1",
            EntityKind::Invoice => "SELECT tenant_id FROM invoices WHERE id = ?1",
            EntityKind::InventoryItem => "SELECT tenant_id FROM inventory_items WHERE id = ?1",
            EntityKind::Appointment => "SELECT tenant_id FROM appointments WHERE id = ?1",
            EntityKind::MedicalAct => {
                "SELECT e.tenant_id FROM medical_acts a
                 JOIN encounters e ON e.id = a.encounter_id WHERE a.id = ?1"
            }
            EntityKind::InvoiceLine => {
                "SELECT i.tenant_id FROM invoice_lines l
                 JOIN invoices i ON i.id = l.invoice_id WHERE l.id = ?1"
            }
            EntityKind::InventoryTransaction => {
                "SELECT i.tenant_id FROM inventory_transactions t
                 JOIN inventory_items i ON i.id = t.item_id WHERE t.id = ?1"
            }
            EntityKind::Tenant | EntityKind::Principal | EntityKind::AuditEntry => {
                return Err(BackendError::Internal {
                    backend_name: "sqlite".to_string(),
                    message: format!("{entity} has no owning tenant"),
                    source: None,
                }
                .into());
            }
        };
        let owner: Option<String> = self
            .conn
            .query_row(sql, params![id], |row| row.get(0))
            .optional()?;
        Ok(owner.map(TenantId::new))
    }

    /// Resolves the tenant of a child record through its parent.
    pub(crate) fn resolve_parent(&self, scoped: &ScopedQuery, parent_id: &str) -> CoreResult<TenantId> {
        let parent = match scoped.entity().tenancy() {
            TenancyModel::ViaParent(parent) => parent,
            _ => scoped.entity(),
        };
        let owner = self.owner_of(parent, parent_id)?;
        scoped.resolve_via_parent(owner, parent_id)
    }

    /// Checks that a referenced record exists and belongs to `tenant_id`.
    pub(crate) fn authorize_reference(
        &self,
        entity: EntityKind,
        id: &str,
        tenant_id: &TenantId,
    ) -> CoreResult<()> {
        match self.owner_of(entity, id)? {
            Some(owner) if &owner == tenant_id => Ok(()),
            Some(_) => Err(TenantError::CrossTenantDenied {
                entity,
                id: id.to_string(),
            }
            .into()),
            None => Err(ResourceError::NotFound {
                entity,
                id: id.to_string(),
            }
            .into()),
        }
    }

    /// Runs one repository mutation, consistency hooks included, inside a
    /// savepoint.
    ///
    /// On error every statement of the mutation is rolled back to the
    /// savepoint and the unit stays usable. If that rollback fails the unit
    /// is poisoned and [`commit`](Self::commit) refuses it.
    pub(crate) fn atomically<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        if self.poisoned {
            return Err(TransactionError::InvalidTransaction.into());
        }
        self.conn.execute_batch("SAVEPOINT mutation")?;
        let audit_counts = (self.audit_recorded, self.audit_degraded);

        match f(self) {
            Ok(value) => {
                if let Err(e) = self.conn.execute_batch("RELEASE mutation") {
                    warn!(error = %e, "could not release mutation savepoint; unit of work poisoned");
                    self.poisoned = true;
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                (self.audit_recorded, self.audit_degraded) = audit_counts;
                if let Err(undo) = self
                    .conn
                    .execute_batch("ROLLBACK TO mutation; RELEASE mutation")
                {
                    warn!(error = %undo, "could not undo failed mutation; unit of work poisoned");
                    self.poisoned = true;
                }
                debug!(error = %e, "mutation rolled back to savepoint");
                Err(e)
            }
        }
    }

    /// Appends an audit entry for a mutation. Never fails the unit.
    pub(crate) fn audit<T: Serialize>(
        &mut self,
        scoped: &ScopedQuery,
        tenant_id: Option<&TenantId>,
        operation: AuditOperation,
        record_id: &str,
        before: Option<&T>,
        after: Option<&T>,
    ) {
        let sink = SavepointSink::new(&self.conn);
        let outcome = self.recorder.record(
            &sink,
            tenant_id,
            scoped.entity(),
            operation,
            scoped.principal_id(),
            record_id,
            before.and_then(snapshot),
            after.and_then(snapshot),
        );
        if outcome.is_degraded() {
            self.audit_degraded += 1;
        } else {
            self.audit_recorded += 1;
        }
    }

    /// Commits the unit of work.
    ///
    /// Fails with a timeout, and rolls back, if the context deadline has
    /// passed or the unit was poisoned.
    pub fn commit(mut self) -> CoreResult<CommitReport> {
        if self.poisoned {
            self.rollback_inner();
            return Err(TransactionError::RolledBack {
                reason: "a failed mutation could not be undone".to_string(),
            }
            .into());
        }

        let deadline = self
            .context
            .as_ref()
            .map_or(Ok(()), TenantContext::check_deadline);
        if let Err(e) = deadline {
            warn!(error = %e, "deadline passed before commit; rolling back");
            self.rollback_inner();
            return Err(e.into());
        }

        self.conn.execute_batch("COMMIT").map_err(|e| TransactionError::RolledBack {
            reason: format!("commit failed: {e}"),
        })?;
        self.active = false;

        let report = CommitReport {
            audit_recorded: self.audit_recorded,
            audit_degraded: self.audit_degraded,
        };
        if report.is_degraded() {
            warn!(
                audit_degraded = report.audit_degraded,
                "unit of work committed with missing audit entries"
            );
        }
        debug!(audit_recorded = report.audit_recorded, "unit of work committed");
        Ok(report)
    }

    /// Discards every change made in this unit.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.conn.execute_batch("ROLLBACK").map_err(|e| TransactionError::RolledBack {
            reason: format!("rollback failed: {e}"),
        })?;
        self.active = false;
        Ok(())
    }

    fn rollback_inner(&mut self) {
        if self.active {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
            self.active = false;
        }
    }
}

impl Drop for SqliteUnitOfWork {
    fn drop(&mut self) {
        self.rollback_inner();
    }
}
