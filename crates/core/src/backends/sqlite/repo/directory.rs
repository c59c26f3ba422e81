//! Tenants and principals.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

use crate::audit::AuditOperation;
use crate::error::{CoreResult, ResourceError, TenantError, ValidationError};
use crate::tenant::{EntityKind, Operation, PrincipalId, ScopedQuery, TenantId};
use crate::types::{NewPrincipal, PrincipalRecord, Tenant};

use super::super::backend::ensure_tenant_active;
use super::super::rows::{format_timestamp, opt_tenant_id, opt_timestamp, tenant_id, timestamp};
use super::super::SqliteUnitOfWork;

const TENANT_COLUMNS: &str = "id, code, active, created_at, deactivated_at";
const PRINCIPAL_COLUMNS: &str =
    "id, tenant_id, is_privileged, display_name, password_hash IS NOT NULL, created_at";

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: tenant_id(row, 0)?,
        code: row.get(1)?,
        active: row.get(2)?,
        created_at: timestamp(row, 3)?,
        deactivated_at: opt_timestamp(row, 4)?,
    })
}

fn principal_from_row(row: &Row<'_>) -> rusqlite::Result<PrincipalRecord> {
    Ok(PrincipalRecord {
        id: PrincipalId::new(row.get::<_, String>(0)?),
        tenant_id: opt_tenant_id(row, 1)?,
        is_privileged: row.get(2)?,
        display_name: row.get(3)?,
        has_password: row.get(4)?,
        created_at: timestamp(row, 5)?,
    })
}

impl SqliteUnitOfWork {
    /// Creates a tenant. Privileged principals only.
    pub fn create_tenant(&mut self, code: &str) -> CoreResult<Tenant> {
        let scoped = self.scoped(EntityKind::Tenant, Operation::Create)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(ValidationError::MissingRequiredField {
                field: "code".to_string(),
            }
            .into());
        }

        let taken = self
            .conn()
            .query_row("SELECT 1 FROM tenants WHERE code = ?1", params![code], |_| Ok(()))
            .optional()?
            .is_some();
        if taken {
            return Err(ResourceError::AlreadyExists {
                entity: EntityKind::Tenant,
                id: code.to_string(),
            }
            .into());
        }

        let tenant = Tenant {
            id: TenantId::generate(),
            code: code.to_string(),
            active: true,
            created_at: Utc::now(),
            deactivated_at: None,
        };
        self.conn().execute(
            "INSERT INTO tenants (id, code, active, created_at) VALUES (?1, ?2, 1, ?3)",
            params![tenant.id.as_str(), tenant.code, format_timestamp(tenant.created_at)],
        )?;

        info!(tenant = %tenant.id, code = %tenant.code, "created tenant");
        self.audit(
            &scoped,
            Some(&tenant.id),
            AuditOperation::Create,
            tenant.id.as_str(),
            None,
            Some(&tenant),
        );
        Ok(tenant)
    }

    /// Deactivates a tenant. Tenants are never deleted.
    pub fn deactivate_tenant(&mut self, id: &TenantId) -> CoreResult<Tenant> {
        let scoped = self.scoped(EntityKind::Tenant, Operation::Update)?;
        let before = self.load_tenant(&scoped, id)?.ok_or_else(|| ResourceError::NotFound {
            entity: EntityKind::Tenant,
            id: id.to_string(),
        })?;
        if !before.active {
            return Ok(before);
        }

        let now = Utc::now();
        self.conn().execute(
            "UPDATE tenants SET active = 0, deactivated_at = ?1 WHERE id = ?2",
            params![format_timestamp(now), id.as_str()],
        )?;
        let after = Tenant {
            active: false,
            deactivated_at: Some(now),
            ..before.clone()
        };

        info!(tenant = %id, "deactivated tenant");
        self.audit(
            &scoped,
            Some(id),
            AuditOperation::Update,
            id.as_str(),
            Some(&before),
            Some(&after),
        );
        Ok(after)
    }

    /// A tenant, if visible. Scoped contexts only see their own tenant.
    pub fn get_tenant(&self, id: &TenantId) -> CoreResult<Option<Tenant>> {
        let scoped = self.scoped(EntityKind::Tenant, Operation::Read)?;
        self.load_tenant(&scoped, id)
    }

    pub fn list_tenants(&self) -> CoreResult<Vec<Tenant>> {
        let scoped = self.scoped(EntityKind::Tenant, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE (?1 IS NULL OR id = ?1) ORDER BY code"
        ))?;
        let tenants = stmt
            .query_map(params![scoped.tenant_param()], tenant_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tenants)
    }

    fn load_tenant(&self, scoped: &ScopedQuery, id: &TenantId) -> CoreResult<Option<Tenant>> {
        let tenant = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1 AND (?2 IS NULL OR id = ?2)"
                ),
                params![id.as_str(), scoped.tenant_param()],
                tenant_from_row,
            )
            .optional()?;
        Ok(tenant)
    }

    /// Creates a principal.
    ///
    /// A member principal lands in `new.tenant_id`, or the caller's tenant when
    /// unset. Only privileged callers may create privileged principals or
    /// place a principal in another tenant.
    pub fn create_principal(&mut self, new: &NewPrincipal) -> CoreResult<PrincipalRecord> {
        let scoped = self.scoped(EntityKind::Principal, Operation::Create)?;
        let caller_privileged = self.context().is_some_and(|c| c.is_privileged());

        if new.is_privileged && !caller_privileged {
            return Err(TenantError::PrivilegeRequired {
                entity: EntityKind::Principal,
                operation: Operation::Create,
            }
            .into());
        }
        if new.display_name.trim().is_empty() {
            return Err(ValidationError::MissingRequiredField {
                field: "display_name".to_string(),
            }
            .into());
        }

        let tenant = match (&new.tenant_id, scoped.write_tenant()) {
            (Some(requested), Ok(own)) if requested != own && !caller_privileged => {
                return Err(TenantError::CrossTenantDenied {
                    entity: EntityKind::Tenant,
                    id: requested.to_string(),
                }
                .into());
            }
            (Some(requested), _) => Some(requested.clone()),
            (None, Ok(own)) => Some(own.clone()),
            (None, Err(_)) if new.is_privileged => None,
            (None, Err(e)) => return Err(e.into()),
        };
        if let Some(tenant) = &tenant {
            ensure_tenant_active(self.conn(), tenant)?;
        }

        let record = PrincipalRecord {
            id: PrincipalId::generate(),
            tenant_id: tenant,
            is_privileged: new.is_privileged,
            display_name: new.display_name.trim().to_string(),
            has_password: false,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO principals (id, tenant_id, is_privileged, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.as_str(),
                record.tenant_id.as_ref().map(|t| t.as_str()),
                record.is_privileged,
                record.display_name,
                format_timestamp(record.created_at),
            ],
        )?;

        self.audit(
            &scoped,
            record.tenant_id.as_ref(),
            AuditOperation::Create,
            record.id.as_str(),
            None,
            Some(&record),
        );
        Ok(record)
    }

    /// Moves a principal to another tenant. Privileged principals only.
    ///
    /// This is the only way a member principal's tenant ever changes.
    pub fn transfer_principal(
        &mut self,
        id: &PrincipalId,
        to: &TenantId,
    ) -> CoreResult<PrincipalRecord> {
        let scoped = self.scoped(EntityKind::Principal, Operation::Update)?;
        if !self.context().is_some_and(|c| c.is_privileged()) {
            return Err(TenantError::PrivilegeRequired {
                entity: EntityKind::Principal,
                operation: Operation::Update,
            }
            .into());
        }

        let before = self.load_principal(&scoped, id)?.ok_or_else(|| not_found(id))?;
        ensure_tenant_active(self.conn(), to)?;
        self.conn().execute(
            "UPDATE principals SET tenant_id = ?1 WHERE id = ?2",
            params![to.as_str(), id.as_str()],
        )?;
        let after = PrincipalRecord {
            tenant_id: Some(to.clone()),
            ..before.clone()
        };

        info!(principal = %id, to = %to, "transferred principal");
        self.audit(
            &scoped,
            Some(to),
            AuditOperation::Update,
            id.as_str(),
            Some(&before),
            Some(&after),
        );
        Ok(after)
    }

    pub fn get_principal(&self, id: &PrincipalId) -> CoreResult<Option<PrincipalRecord>> {
        let scoped = self.scoped(EntityKind::Principal, Operation::Read)?;
        self.load_principal(&scoped, id)
    }

    pub fn list_principals(&self) -> CoreResult<Vec<PrincipalRecord>> {
        let scoped = self.scoped(EntityKind::Principal, Operation::Search)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals
             WHERE (?1 IS NULL OR tenant_id = ?1) ORDER BY display_name, id"
        ))?;
        let principals = stmt
            .query_map(params![scoped.tenant_param()], principal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(principals)
    }

    /// Stores a new password digest for a principal.
    ///
    /// Only the principal itself or a privileged caller may do this.
    pub(crate) fn set_password_digest(&mut self, id: &PrincipalId, digest: &str) -> CoreResult<()> {
        let scoped = self.scoped(EntityKind::Principal, Operation::Update)?;
        let before = self.load_principal(&scoped, id)?.ok_or_else(|| not_found(id))?;
        self.authorize_credentials(&scoped, &before)?;
        self.conn().execute(
            "UPDATE principals SET password_hash = ?1 WHERE id = ?2",
            params![digest, id.as_str()],
        )?;
        let after = PrincipalRecord {
            has_password: true,
            ..before.clone()
        };
        self.audit(
            &scoped,
            before.tenant_id.as_ref(),
            AuditOperation::Update,
            id.as_str(),
            Some(&before),
            Some(&after),
        );
        Ok(())
    }

    /// The stored password digest of a visible principal.
    ///
    /// Same rule as [`set_password_digest`](Self::set_password_digest):
    /// members can only reach their own digest.
    pub(crate) fn password_digest(&self, id: &PrincipalId) -> CoreResult<Option<String>> {
        let scoped = self.scoped(EntityKind::Principal, Operation::Read)?;
        let target = self.load_principal(&scoped, id)?.ok_or_else(|| not_found(id))?;
        self.authorize_credentials(&scoped, &target)?;
        let digest = self.conn().query_row(
            "SELECT password_hash FROM principals WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(digest)
    }

    /// Credentials belong to their principal; only a privileged caller may
    /// act on someone else's.
    fn authorize_credentials(&self, scoped: &ScopedQuery, target: &PrincipalRecord) -> CoreResult<()> {
        let privileged = self.context().is_some_and(|c| c.is_privileged());
        if privileged || scoped.principal_id() == &target.id {
            return Ok(());
        }
        Err(TenantError::PrivilegeRequired {
            entity: EntityKind::Principal,
            operation: scoped.operation(),
        }
        .into())
    }

    fn load_principal(
        &self,
        scoped: &ScopedQuery,
        id: &PrincipalId,
    ) -> CoreResult<Option<PrincipalRecord>> {
        let principal = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {PRINCIPAL_COLUMNS} FROM principals
                     WHERE id = ?1 AND (?2 IS NULL OR tenant_id = ?2)"
                ),
                params![id.as_str(), scoped.tenant_param()],
                principal_from_row,
            )
            .optional()?;
        Ok(principal)
    }
}

fn not_found(id: &PrincipalId) -> ResourceError {
    ResourceError::NotFound {
        entity: EntityKind::Principal,
        id: id.to_string(),
    }
}
