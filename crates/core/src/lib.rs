//! Carebase Core
//!
//! Tenant isolation, field encryption and consistency substrate for the
//! Carebase multi-tenant clinical records backend.
//!
//! # Features
//!
//! - **Fail-closed isolation**: every data access is scoped to the caller's
//!   tenant; an access without a tenant context is refused
//! - **Field encryption**: clinical notes and care plans are stored as
//!   AES-256-GCM envelopes and revealed only on explicit read paths
//! - **Credential hashing**: Argon2id digests with transparent parameter
//!   upgrades
//! - **Consistency engine**: invoice totals, commission amounts, stock levels
//!   and patient search tokens are recomputed inside the transaction that
//!   invalidates them
//! - **Audit trail**: every mutation appends a redacted before/after snapshot
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant context, permissions and the isolation enforcer
//! - [`crypto`] - Field encryption and credential hashing
//! - [`consistency`] - Derived-value rules and the engine that applies them
//! - [`audit`] - Audit recording
//! - [`types`] - Domain records
//! - [`error`] - Error types for all operations
//! - [`config`] / [`config_store`] - Configuration and the secret store port
//! - [`backends`] - Storage backends
//! - [`service`] - The request entry point
//!
//! # Multitenancy
//!
//! ```
//! use carebase_core::tenant::{
//!     build_context, EntityKind, IsolationEnforcer, Operation, Principal, TenantId,
//! };
//!
//! let enforcer = IsolationEnforcer::new();
//!
//! // No context, no access.
//! assert!(enforcer.enforce(None, EntityKind::Invoice, Operation::Search).is_err());
//!
//! let ctx = build_context(Some(&Principal::member("u1", TenantId::new("clinic-a")))).unwrap();
//! let scoped = enforcer.enforce(Some(&ctx), EntityKind::Invoice, Operation::Search).unwrap();
//! assert_eq!(scoped.tenant_param(), Some("clinic-a"));
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod backends;
pub mod config;
pub mod config_store;
pub mod consistency;
pub mod crypto;
pub mod error;
#[cfg(feature = "sqlite")]
pub mod service;
pub mod tenant;
pub mod types;

// Re-export commonly used types at crate root
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use tenant::{Principal, TenantContext, TenantId};

#[cfg(feature = "sqlite")]
pub use service::{CareCore, RequestScope};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
