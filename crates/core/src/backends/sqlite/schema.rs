//! SQLite schema definitions and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::{BackendError, CoreError, CoreResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

fn migration_error(step: &str, e: rusqlite::Error) -> CoreError {
    CoreError::Backend(BackendError::MigrationError {
        message: format!("{step}: {e}"),
    })
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> CoreResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate_schema(conn, 1)?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(conn, current_version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> CoreResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> CoreResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| migration_error("failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| migration_error("failed to set schema_version", e))?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            deactivated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS principals (
            id TEXT PRIMARY KEY,
            tenant_id TEXT REFERENCES tenants(id),
            is_privileged INTEGER NOT NULL DEFAULT 0,
            display_name TEXT NOT NULL,
            password_hash TEXT,
            created_at TEXT NOT NULL,
            CHECK (is_privileged = 1 OR tenant_id IS NOT NULL)
        );

        CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            full_name TEXT NOT NULL,
            document TEXT,
            birth_date TEXT,
            clinical_notes BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS patient_search (
            tenant_id TEXT NOT NULL,
            patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
            token TEXT NOT NULL,
            PRIMARY KEY (patient_id, token)
        );

        CREATE TABLE IF NOT EXISTS encounters (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            patient_id TEXT NOT NULL REFERENCES patients(id),
            reason TEXT NOT NULL,
            care_plan BLOB,
            opened_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS medical_acts (
            id TEXT PRIMARY KEY,
            encounter_id TEXT NOT NULL REFERENCES encounters(id),
            description TEXT NOT NULL,
            price TEXT NOT NULL,
            internal_rate TEXT NOT NULL,
            external_rate TEXT NOT NULL,
            internal_amount TEXT NOT NULL,
            external_amount TEXT NOT NULL,
            performed_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            patient_id TEXT NOT NULL REFERENCES patients(id),
            total TEXT NOT NULL DEFAULT '0',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS invoice_lines (
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL REFERENCES invoices(id),
            description TEXT NOT NULL,
            quantity TEXT NOT NULL,
            unit_price TEXT NOT NULL,
            line_total TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS inventory_items (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            sku TEXT NOT NULL,
            name TEXT NOT NULL,
            stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
            updated_at TEXT NOT NULL,
            UNIQUE (tenant_id, sku)
        );

        CREATE TABLE IF NOT EXISTS inventory_transactions (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL REFERENCES inventory_items(id),
            direction TEXT NOT NULL CHECK (direction IN ('inbound', 'outbound')),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            reason TEXT,
            principal_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT,
            entity TEXT NOT NULL,
            operation TEXT NOT NULL,
            principal_id TEXT NOT NULL,
            record_id TEXT NOT NULL,
            before_snapshot TEXT,
            after_snapshot TEXT,
            recorded_at TEXT NOT NULL
        );",
    )
    .map_err(|e| migration_error("failed to create v1 tables", e))?;

    create_append_only_guards(conn)?;
    create_indexes(conn)?;

    Ok(())
}

/// Ledger and audit rows can never be changed once written.
fn create_append_only_guards(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS inventory_transactions_no_update
            BEFORE UPDATE ON inventory_transactions
         BEGIN
            SELECT RAISE(ABORT, 'inventory ledger is append-only');
         END;

         CREATE TRIGGER IF NOT EXISTS inventory_transactions_no_delete
            BEFORE DELETE ON inventory_transactions
         BEGIN
            SELECT RAISE(ABORT, 'inventory ledger is append-only');
         END;

         CREATE TRIGGER IF NOT EXISTS audit_log_no_update
            BEFORE UPDATE ON audit_log
         BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only');
         END;

         CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
            BEFORE DELETE ON audit_log
         BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only');
         END;",
    )
    .map_err(|e| migration_error("failed to create append-only triggers", e))
}

/// Create indexes for efficient queries.
fn create_indexes(conn: &Connection) -> CoreResult<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_principals_tenant ON principals(tenant_id)",
        "CREATE INDEX IF NOT EXISTS idx_patients_tenant ON patients(tenant_id, full_name)",
        "CREATE INDEX IF NOT EXISTS idx_patient_search_token ON patient_search(tenant_id, token)",
        "CREATE INDEX IF NOT EXISTS idx_encounters_patient ON encounters(tenant_id, patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_medical_acts_encounter ON medical_acts(encounter_id)",
        "CREATE INDEX IF NOT EXISTS idx_invoices_tenant ON invoices(tenant_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id)",
        "CREATE INDEX IF NOT EXISTS idx_inventory_items_tenant ON inventory_items(tenant_id)",
        "CREATE INDEX IF NOT EXISTS idx_inventory_transactions_item ON inventory_transactions(item_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_log_tenant ON audit_log(tenant_id, entity, record_id)",
    ];

    for index_sql in &indexes {
        conn.execute(index_sql, [])
            .map_err(|e| migration_error("failed to create index", e))?;
    }

    Ok(())
}

/// Run migrations from the given version to the current version.
fn migrate_schema(conn: &Connection, from_version: i32) -> CoreResult<()> {
    let mut version = from_version;

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            _ => {
                return Err(CoreError::Backend(BackendError::MigrationError {
                    message: format!("no migration from schema version {version}"),
                }));
            }
        }
        version += 1;
        set_schema_version(conn, version)?;
        info!(version, "migrated sqlite schema");
    }

    Ok(())
}

/// Version 2: appointments and the configuration table.
fn migrate_v1_to_v2(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id),
            patient_id TEXT NOT NULL REFERENCES patients(id),
            practitioner_id TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'booked' CHECK (status IN ('booked', 'cancelled')),
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_appointments_practitioner
            ON appointments(tenant_id, practitioner_id, starts_at);

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
    .map_err(|e| migration_error("failed to apply v2 migration", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .is_ok()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        for table in [
            "tenants",
            "principals",
            "patients",
            "patient_search",
            "encounters",
            "medical_acts",
            "invoices",
            "invoice_lines",
            "inventory_items",
            "inventory_transactions",
            "appointments",
            "audit_log",
            "app_config",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_migrates_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        get_schema_version(&conn).unwrap();
        create_schema_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();
        assert!(!table_exists(&conn, "appointments"));

        initialize_schema(&conn).unwrap();
        assert!(table_exists(&conn, "appointments"));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_ledger_is_append_only() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO tenants (id, code, created_at) VALUES ('t1', 'c1', '2026-01-01T00:00:00Z');
             INSERT INTO inventory_items (id, tenant_id, sku, name, stock, updated_at)
                VALUES ('i1', 't1', 'SKU', 'Gauze', 5, '2026-01-01T00:00:00Z');
             INSERT INTO inventory_transactions (id, item_id, direction, quantity, principal_id, created_at)
                VALUES ('l1', 'i1', 'inbound', 5, 'u1', '2026-01-01T00:00:00Z');",
        )
        .unwrap();

        assert!(
            conn.execute("UPDATE inventory_transactions SET quantity = 7", [])
                .is_err()
        );
        assert!(conn.execute("DELETE FROM inventory_transactions", []).is_err());
    }
}
