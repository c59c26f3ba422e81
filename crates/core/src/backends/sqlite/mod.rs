//! SQLite backend implementation.
//!
//! This module provides the SQLite storage engine for Carebase. It supports
//! both in-memory databases (great for testing) and file-based databases.
//!
//! # Features
//!
//! - In-memory and file-based modes over an `r2d2` connection pool
//! - Units of work that own their pooled connection for their whole life
//! - Tenant filters bound as statement parameters, never as session state
//! - Derived aggregates recomputed inside the triggering transaction
//! - Append-only ledger and audit tables guarded by triggers
//!
//! # Example
//!
//! ```no_run
//! use carebase_core::backends::sqlite::SqliteBackend;
//! use carebase_core::tenant::{build_context, Principal};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! let root = build_context(Some(&Principal::privileged("root", None)))?;
//! let mut uow = backend.begin(Some(&root))?;
//! let tenant = uow.create_tenant("clinic-north")?;
//! uow.commit()?;
//! # let _ = tenant;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! Tenant-owned tables carry a `tenant_id` column. Child tables
//! (`medical_acts`, `invoice_lines`, `inventory_transactions`) do not; they
//! are scoped by joining through their parent:
//!
//! ```sql
//! SELECT ... FROM invoice_lines l
//! JOIN invoices i ON i.id = l.invoice_id
//! WHERE l.invoice_id = ?1 AND (?2 IS NULL OR i.tenant_id = ?2)
//! ```

mod backend;
mod config_store;
mod repo;
mod rows;
mod schema;
mod unit_of_work;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use schema::SCHEMA_VERSION;
pub use unit_of_work::{CommitReport, SqliteUnitOfWork, UnitMode};
