//! Authenticated actors.

use serde::Serialize;

use super::id::{PrincipalId, TenantId};
use super::permissions::TenantPermissions;

/// An authenticated actor, as handed over by the authentication layer.
///
/// A non-privileged principal always belongs to exactly one tenant; the
/// constructors make the invalid combination unrepresentable.
///
/// # Examples
///
/// ```
/// use carebase_core::tenant::{Principal, TenantId};
///
/// let nurse = Principal::member("nurse-1", TenantId::new("clinic-a"));
/// assert!(!nurse.is_privileged());
///
/// let operator = Principal::privileged("ops", None);
/// assert!(operator.tenant_id().is_none());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    id: PrincipalId,
    tenant_id: Option<TenantId>,
    is_privileged: bool,
    #[serde(skip)]
    permissions: TenantPermissions,
}

impl Principal {
    /// A regular member of `tenant_id` with full access inside that tenant.
    pub fn member(id: impl Into<PrincipalId>, tenant_id: TenantId) -> Self {
        Self {
            id: id.into(),
            tenant_id: Some(tenant_id),
            is_privileged: false,
            permissions: TenantPermissions::full_access(),
        }
    }

    /// A privileged principal, optionally attached to a tenant.
    ///
    /// Without a tenant the principal's reads are unscoped.
    pub fn privileged(id: impl Into<PrincipalId>, tenant_id: Option<TenantId>) -> Self {
        Self {
            id: id.into(),
            tenant_id,
            is_privileged: true,
            permissions: TenantPermissions::full_access(),
        }
    }

    /// Restricts what the principal may do.
    pub fn with_permissions(mut self, permissions: TenantPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn id(&self) -> &PrincipalId {
        &self.id
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn is_privileged(&self) -> bool {
        self.is_privileged
    }

    pub fn permissions(&self) -> &TenantPermissions {
        &self.permissions
    }
}
