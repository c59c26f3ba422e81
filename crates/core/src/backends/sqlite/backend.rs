//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BackendError, CoreError, CoreResult, TenantError};
use crate::tenant::{TenantContext, TenantId};

use super::schema;
use super::unit_of_work::{SqliteUnitOfWork, UnitMode};

/// SQLite backend for Carebase records.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    ///
    /// Every pooled connection to `:memory:` would open its own private
    /// database, so the pool is pinned to a single connection.
    pub fn in_memory() -> CoreResult<Self> {
        Self::with_config(":memory:", SqliteBackendConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a backend with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, mut config: SqliteBackendConfig) -> CoreResult<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let is_memory = path_str == ":memory:";

        if is_memory {
            config.max_connections = 1;
            config.min_connections = 1;
        }

        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let foreign_keys = config.enable_foreign_keys;
        let wal = config.enable_wal && !is_memory;

        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(path.as_ref())
        };
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if foreign_keys {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            }
            if wal {
                let _mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_connections))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                CoreError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        info!(path = %path_str, is_memory, max_connections = config.max_connections, "opened sqlite backend");

        Ok(Self {
            pool,
            config,
            is_memory,
        })
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> CoreResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(&self) -> CoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Opens a read-write unit of work for `context`.
    ///
    /// A missing context does not fail here; every operation on the unit
    /// fails instead, so nothing is ever read or written without one.
    ///
    /// For an in-memory database the unit holds the only pooled connection
    /// until it is committed or dropped.
    pub fn begin(&self, context: Option<&TenantContext>) -> CoreResult<SqliteUnitOfWork> {
        let conn = self.get_connection()?;
        SqliteUnitOfWork::begin(conn, context.cloned(), UnitMode::ReadWrite)
    }

    /// Opens a read-only unit of work for `context`.
    pub fn begin_read(&self, context: Option<&TenantContext>) -> CoreResult<SqliteUnitOfWork> {
        let conn = self.get_connection()?;
        SqliteUnitOfWork::begin(conn, context.cloned(), UnitMode::ReadOnly)
    }

    /// Checks that `tenant_id` exists and is active.
    ///
    /// Runs before a request scope exists, so it reads only the tenant row.
    pub fn ensure_tenant_active(&self, tenant_id: &TenantId) -> CoreResult<()> {
        let conn = self.get_connection()?;
        ensure_tenant_active(&conn, tenant_id)
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }
}

pub(crate) fn ensure_tenant_active(
    conn: &rusqlite::Connection,
    tenant_id: &TenantId,
) -> CoreResult<()> {
    let active: Option<bool> = conn
        .query_row(
            "SELECT active FROM tenants WHERE id = ?1",
            params![tenant_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match active {
        Some(true) => Ok(()),
        Some(false) => {
            debug!(tenant = %tenant_id, "tenant is inactive");
            Err(TenantError::TenantInactive {
                tenant_id: tenant_id.clone(),
            }
            .into())
        }
        None => Err(TenantError::UnknownTenant {
            tenant_id: tenant_id.clone(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_backend() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.is_memory());
        assert_eq!(backend.config().max_connections, 1);
        backend.init_schema().unwrap();
    }

    #[test]
    fn test_schema_init_is_idempotent() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        backend.init_schema().unwrap();
    }

    #[test]
    fn test_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(dir.path().join("carebase.db")).unwrap();
        assert!(!backend.is_memory());
        backend.init_schema().unwrap();
    }

    #[test]
    fn test_unknown_tenant() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        let err = backend
            .ensure_tenant_active(&TenantId::new("ghost"))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Tenant(TenantError::UnknownTenant { .. })
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config: SqliteBackendConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.enable_wal);
        assert!(config.enable_foreign_keys);
    }
}
