//! Error types for the Carebase core.
//!
//! Errors are grouped per concern (tenancy, cryptography, credentials,
//! consistency, resources, transactions, backend, validation) and aggregated
//! by [`CoreError`]. Audit write failures are deliberately absent here: they
//! are reported through [`crate::audit::AuditOutcome`] and never abort the
//! surrounding operation.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::crypto::PolicyViolation;
use crate::tenant::{EntityKind, Operation, TenantId};

/// The primary error type for all core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Tenant isolation errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Field encryption errors
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Credential hashing errors
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Business-rule conflicts raised by the consistency engine
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Record state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Unit-of-work errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Input validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CoreError {
    /// Returns `true` if the caller should treat this error as "record not found".
    ///
    /// Cross-tenant denials are included so callers never learn whether a
    /// record exists in another tenant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::Resource(ResourceError::NotFound { .. })
                | CoreError::Tenant(TenantError::CrossTenantDenied { .. })
        )
    }

    /// Returns `true` for recoverable business conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::Consistency(
                ConsistencyError::InsufficientStock { .. } | ConsistencyError::DoubleBooked { .. }
            ) | CoreError::Resource(ResourceError::AlreadyExists { .. })
        )
    }

    /// Returns `true` for errors that must abort the request outright.
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::Tenant(_) | CoreError::Crypto(_) | CoreError::Backend(_) => true,
            CoreError::Transaction(TransactionError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

/// Errors related to tenant isolation.
#[derive(Error, Debug)]
pub enum TenantError {
    /// No principal was supplied to the request entry point.
    #[error("unauthenticated: no principal supplied")]
    Unauthenticated,

    /// A data access was attempted without a tenant context.
    #[error("tenant context missing for {operation} on {entity}")]
    ContextMissing {
        entity: EntityKind,
        operation: Operation,
    },

    /// The record belongs to a different tenant.
    ///
    /// Renders exactly like a not-found so existence is never disclosed.
    #[error("record not found: {entity}/{id}")]
    CrossTenantDenied { entity: EntityKind, id: String },

    /// A write needs a concrete tenant but the context is unscoped.
    #[error("tenant required to {operation} {entity}")]
    TenantRequired {
        entity: EntityKind,
        operation: Operation,
    },

    /// The tenant has been deactivated.
    #[error("tenant inactive: {tenant_id}")]
    TenantInactive { tenant_id: TenantId },

    /// The tenant does not exist.
    #[error("unknown tenant: {tenant_id}")]
    UnknownTenant { tenant_id: TenantId },

    /// The context's permissions do not allow the operation.
    #[error("operation {operation} on {entity} not permitted for principal {principal_id}")]
    OperationNotPermitted {
        principal_id: String,
        entity: EntityKind,
        operation: Operation,
    },

    /// The operation is reserved for privileged principals.
    #[error("{operation} on {entity} requires a privileged principal")]
    PrivilegeRequired {
        entity: EntityKind,
        operation: Operation,
    },
}

/// Errors raised by the field encryption service.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The encryption key is not present in the configuration store.
    #[error("encryption key unavailable: {key}")]
    KeyUnavailable { key: String },

    /// The configured key is not 32 bytes of base64.
    #[error("invalid encryption key: {message}")]
    InvalidKey { message: String },

    /// Sealing a value failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// The envelope is malformed, tampered with, or sealed by another key.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },
}

/// Errors raised by the credential hashing service.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The password does not satisfy the configured policy.
    #[error("weak password: {}", format_violations(.violations))]
    WeakInput { violations: Vec<PolicyViolation> },

    /// The hashing primitive failed.
    #[error("password hashing failed: {message}")]
    HashingFailed { message: String },
}

fn format_violations(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Business-rule conflicts detected by the consistency engine.
#[derive(Error, Debug)]
pub enum ConsistencyError {
    /// An outbound movement would take stock below zero.
    #[error("insufficient stock for item {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: String,
        available: i64,
        requested: i64,
    },

    /// The practitioner already has an appointment in the requested slot.
    #[error("practitioner {practitioner_id} already booked by appointment {conflicting_id}")]
    DoubleBooked {
        practitioner_id: String,
        conflicting_id: String,
    },

    /// A quantity is zero or negative.
    #[error("invalid quantity for {field}: {value}")]
    InvalidQuantity { field: String, value: String },

    /// A commission rate is outside `0..=1` or the price is negative.
    #[error("invalid commission input for {field}: {value}")]
    InvalidRate { field: String, value: String },

    /// A derived amount does not fit a decimal.
    #[error("amount overflow computing {field}")]
    AmountOverflow { field: String },

    /// An appointment ends before it starts.
    #[error("invalid schedule: appointment must end after it starts")]
    InvalidSchedule,
}

/// Errors related to record state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested record was not found in the caller's scope.
    #[error("record not found: {entity}/{id}")]
    NotFound { entity: EntityKind, id: String },

    /// A record with the same natural key already exists.
    #[error("record already exists: {entity}/{id}")]
    AlreadyExists { entity: EntityKind, id: String },
}

/// Errors related to units of work.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The request deadline elapsed.
    #[error("transaction timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The unit of work was rolled back.
    #[error("transaction rolled back: {reason}")]
    RolledBack { reason: String },

    /// The unit of work is no longer usable.
    #[error("transaction no longer valid")]
    InvalidTransaction,
}

/// Errors related to input validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// A field has an unusable value.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for CoreError {
    fn from(_err: r2d2::Error) -> Self {
        CoreError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}
