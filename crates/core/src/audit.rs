//! Audit recording.
//!
//! Every create, update and delete of a tenant-owned record appends one
//! audit entry with before/after snapshots. Recording is best effort: a
//! failed write is logged and reported as [`AuditOutcome::Degraded`], and the
//! business operation carries on.
//!
//! Snapshots are taken from stored records, whose protected fields are
//! [`Envelope`](crate::crypto::Envelope)s that serialize as
//! [`PROTECTED_MARKER`](crate::crypto::PROTECTED_MARKER). Plaintext never
//! reaches the audit log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::tenant::{EntityKind, PrincipalId, TenantId};

/// The mutation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Create => "create",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(AuditOperation::Create),
            "update" => Some(AuditOperation::Update),
            "delete" => Some(AuditOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit entry waiting to be written.
#[derive(Debug, Clone, Serialize)]
pub struct AuditDraft {
    pub tenant_id: Option<TenantId>,
    pub entity: EntityKind,
    pub operation: AuditOperation,
    pub principal_id: PrincipalId,
    pub record_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub tenant_id: Option<TenantId>,
    pub entity: EntityKind,
    pub operation: AuditOperation,
    pub principal_id: PrincipalId,
    pub record_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Filter for audit trail queries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity: Option<EntityKind>,
    pub record_id: Option<String>,
    /// Maximum number of entries, newest first. Defaults to 100.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_record(entity: EntityKind, record_id: impl Into<String>) -> Self {
        Self {
            entity: Some(entity),
            record_id: Some(record_id.into()),
            limit: None,
        }
    }
}

/// A failed audit write.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit write failed: {message}")]
    WriteFailed { message: String },
}

/// Result of recording one audit entry.
#[derive(Debug)]
pub enum AuditOutcome {
    Recorded,
    /// The entry could not be written; the operation continued without it.
    Degraded(AuditError),
}

impl AuditOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, AuditOutcome::Degraded(_))
    }
}

/// Where audit entries are appended.
pub trait AuditSink {
    fn append(&self, draft: &AuditDraft) -> Result<(), AuditError>;
}

/// Takes a redacted JSON snapshot of a stored record.
pub fn snapshot<T: Serialize>(record: &T) -> Option<Value> {
    match serde_json::to_value(record) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "failed to snapshot record for audit");
            None
        }
    }
}

/// Records mutations into an [`AuditSink`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditRecorder;

impl AuditRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Appends one entry. Never fails the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn record<S: AuditSink + ?Sized>(
        &self,
        sink: &S,
        tenant_id: Option<&TenantId>,
        entity: EntityKind,
        operation: AuditOperation,
        principal_id: &PrincipalId,
        record_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) -> AuditOutcome {
        let draft = AuditDraft {
            tenant_id: tenant_id.cloned(),
            entity,
            operation,
            principal_id: principal_id.clone(),
            record_id: record_id.to_string(),
            before,
            after,
            recorded_at: Utc::now(),
        };

        match sink.append(&draft) {
            Ok(()) => AuditOutcome::Recorded,
            Err(e) => {
                warn!(
                    entity = %entity,
                    operation = %operation,
                    record_id,
                    principal = %principal_id,
                    error = %e,
                    "audit entry dropped; continuing in degraded mode"
                );
                AuditOutcome::Degraded(e)
            }
        }
    }
}
