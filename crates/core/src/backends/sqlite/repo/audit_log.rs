//! Audit log storage.

use rusqlite::{Connection, params};
use tracing::warn;

use crate::audit::{AuditDraft, AuditEntry, AuditError, AuditFilter, AuditOperation, AuditSink};
use crate::error::CoreResult;
use crate::tenant::{EntityKind, Operation};

use super::super::rows::{format_timestamp, opt_tenant_id, parsed, principal_id, timestamp};
use super::super::SqliteUnitOfWork;

const DEFAULT_LIMIT: usize = 100;

/// Writes audit entries inside a savepoint of the open transaction.
///
/// A failed write rolls back to the savepoint only, so the business changes
/// around it survive.
pub(crate) struct SavepointSink<'a> {
    conn: &'a Connection,
}

impl<'a> SavepointSink<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert(&self, draft: &AuditDraft) -> rusqlite::Result<()> {
        let before = draft.before.as_ref().map(|v| v.to_string());
        let after = draft.after.as_ref().map(|v| v.to_string());
        self.conn.execute(
            "INSERT INTO audit_log
                (tenant_id, entity, operation, principal_id, record_id,
                 before_snapshot, after_snapshot, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                draft.tenant_id.as_ref().map(|t| t.as_str()),
                draft.entity.as_str(),
                draft.operation.as_str(),
                draft.principal_id.as_str(),
                draft.record_id,
                before,
                after,
                format_timestamp(draft.recorded_at),
            ],
        )?;
        Ok(())
    }
}

impl AuditSink for SavepointSink<'_> {
    fn append(&self, draft: &AuditDraft) -> Result<(), AuditError> {
        let write_failed = |e: rusqlite::Error| AuditError::WriteFailed {
            message: e.to_string(),
        };

        self.conn
            .execute_batch("SAVEPOINT audit_entry")
            .map_err(write_failed)?;

        match self.insert(draft) {
            Ok(()) => self
                .conn
                .execute_batch("RELEASE audit_entry")
                .map_err(write_failed),
            Err(e) => {
                // Undo the partial write, keep the enclosing transaction.
                if let Err(undo) = self
                    .conn
                    .execute_batch("ROLLBACK TO audit_entry; RELEASE audit_entry")
                {
                    warn!(error = %undo, "could not roll back failed audit entry");
                }
                Err(write_failed(e))
            }
        }
    }
}

fn json_column(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|raw| serde_json::from_str(&raw).ok())
}

impl SqliteUnitOfWork {
    /// Audit entries visible to the caller, newest first.
    pub fn list_audit_entries(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditEntry>> {
        let scoped = self.scoped(EntityKind::AuditEntry, Operation::Search)?;
        let limit = i64::try_from(filter.limit.unwrap_or(DEFAULT_LIMIT)).unwrap_or(i64::MAX);

        let mut stmt = self.conn().prepare(
            "SELECT id, tenant_id, entity, operation, principal_id, record_id,
                    before_snapshot, after_snapshot, recorded_at
             FROM audit_log
             WHERE (?1 IS NULL OR tenant_id = ?1)
               AND (?2 IS NULL OR entity = ?2)
               AND (?3 IS NULL OR record_id = ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let entries = stmt
            .query_map(
                params![
                    scoped.tenant_param(),
                    filter.entity.map(|e| e.as_str()),
                    filter.record_id.as_deref(),
                    limit,
                ],
                |row| {
                    Ok(AuditEntry {
                        id: row.get(0)?,
                        tenant_id: opt_tenant_id(row, 1)?,
                        entity: parsed(row, 2, EntityKind::parse)?,
                        operation: parsed(row, 3, AuditOperation::parse)?,
                        principal_id: principal_id(row, 4)?,
                        record_id: row.get(5)?,
                        before: json_column(row.get(6)?),
                        after: json_column(row.get(7)?),
                        recorded_at: timestamp(row, 8)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
