//! Fail-closed tenant scoping.
//!
//! Every data access passes through [`IsolationEnforcer::enforce`], which
//! turns an optional [`TenantContext`] into a [`ScopedQuery`]. A
//! `ScopedQuery` cannot be built any other way, so repository code that takes
//! one has provably been scoped.

use tracing::trace;

use super::context::TenantContext;
use super::entity::{EntityKind, TenancyModel};
use super::id::{PrincipalId, TenantId};
use super::permissions::Operation;
use crate::error::{CoreError, ResourceError, TenantError};

/// The row filter a scoped query applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Only rows owned by this tenant are visible or writable.
    Tenant(TenantId),
    /// All rows are visible. Only reachable by privileged principals with no
    /// tenant attached.
    Unscoped,
}

/// A data access that has passed isolation enforcement.
#[derive(Debug, Clone)]
pub struct ScopedQuery {
    entity: EntityKind,
    operation: Operation,
    scope: Scope,
    principal_id: PrincipalId,
}

impl ScopedQuery {
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal_id
    }

    /// The tenant filter to bind as a statement parameter.
    ///
    /// `None` means unscoped; statements use `(?N IS NULL OR tenant_id = ?N)`
    /// so the filter is always a bound value, never spliced SQL.
    pub fn tenant_param(&self) -> Option<&str> {
        match &self.scope {
            Scope::Tenant(tenant) => Some(tenant.as_str()),
            Scope::Unscoped => None,
        }
    }

    /// Returns `true` if rows owned by `owner` are within scope.
    pub fn admits(&self, owner: &TenantId) -> bool {
        match &self.scope {
            Scope::Tenant(tenant) => tenant == owner,
            Scope::Unscoped => true,
        }
    }

    /// Checks a loaded record's owner, denying records from other tenants.
    pub fn authorize_owner(&self, owner: &TenantId, record_id: &str) -> Result<(), TenantError> {
        if self.admits(owner) {
            Ok(())
        } else {
            Err(TenantError::CrossTenantDenied {
                entity: self.entity,
                id: record_id.to_string(),
            })
        }
    }

    /// The tenant a newly created record must be written under.
    pub fn write_tenant(&self) -> Result<&TenantId, TenantError> {
        match &self.scope {
            Scope::Tenant(tenant) => Ok(tenant),
            Scope::Unscoped => Err(TenantError::TenantRequired {
                entity: self.entity,
                operation: self.operation,
            }),
        }
    }

    /// The scope of a value derived from this access, such as the invoice
    /// total behind a line write.
    ///
    /// Keeps the tenant filter and principal without a second permission
    /// check: the caller was authorized for the write that triggers the
    /// derivation.
    pub(crate) fn derived(&self, entity: EntityKind) -> ScopedQuery {
        ScopedQuery {
            entity,
            operation: Operation::Update,
            scope: self.scope.clone(),
            principal_id: self.principal_id.clone(),
        }
    }

    /// Resolves the owning tenant of a child record through its parent.
    ///
    /// `parent_owner` is the parent's tenant as loaded by the caller, or
    /// `None` if the parent does not exist.
    pub fn resolve_via_parent(
        &self,
        parent_owner: Option<TenantId>,
        parent_id: &str,
    ) -> Result<TenantId, CoreError> {
        let parent = match self.entity.tenancy() {
            TenancyModel::ViaParent(parent) => parent,
            _ => self.entity,
        };
        let Some(owner) = parent_owner else {
            return Err(ResourceError::NotFound {
                entity: parent,
                id: parent_id.to_string(),
            }
            .into());
        };
        if !self.admits(&owner) {
            return Err(TenantError::CrossTenantDenied {
                entity: parent,
                id: parent_id.to_string(),
            }
            .into());
        }
        Ok(owner)
    }
}

/// Intercepts every data access and scopes it to the caller's tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolationEnforcer;

impl IsolationEnforcer {
    pub fn new() -> Self {
        Self
    }

    /// Scopes an access to `entity` for `operation`.
    ///
    /// Fails closed: without a context the access is refused with
    /// [`TenantError::ContextMissing`], whatever the entity kind.
    ///
    /// ```
    /// use carebase_core::tenant::{
    ///     build_context, EntityKind, IsolationEnforcer, Operation, Principal, Scope, TenantId,
    /// };
    ///
    /// let enforcer = IsolationEnforcer::new();
    /// assert!(enforcer.enforce(None, EntityKind::Patient, Operation::Read).is_err());
    ///
    /// let ctx = build_context(Some(&Principal::member("u1", TenantId::new("t1")))).unwrap();
    /// let scoped = enforcer.enforce(Some(&ctx), EntityKind::Patient, Operation::Read).unwrap();
    /// assert_eq!(scoped.scope(), &Scope::Tenant(TenantId::new("t1")));
    /// ```
    pub fn enforce(
        &self,
        context: Option<&TenantContext>,
        entity: EntityKind,
        operation: Operation,
    ) -> Result<ScopedQuery, TenantError> {
        let Some(context) = context else {
            return Err(TenantError::ContextMissing { entity, operation });
        };

        context.check_permission(operation, entity)?;

        if entity.tenancy() == TenancyModel::Global && operation.is_write() && !context.is_privileged()
        {
            return Err(TenantError::PrivilegeRequired { entity, operation });
        }

        let scope = match context.tenant_id() {
            Some(tenant) => Scope::Tenant(tenant.clone()),
            None if context.is_unscoped() => Scope::Unscoped,
            // A non-privileged context without a tenant cannot be built, but
            // never widen scope if one shows up.
            None => return Err(TenantError::ContextMissing { entity, operation }),
        };

        trace!(
            entity = %entity,
            operation = %operation,
            principal = %context.principal_id(),
            scope = ?scope,
            "scoped data access"
        );

        Ok(ScopedQuery {
            entity,
            operation,
            scope,
            principal_id: context.principal_id().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{Principal, TenantPermissions, build_context};

    fn member(tenant: &str) -> TenantContext {
        build_context(Some(&Principal::member("u1", TenantId::new(tenant)))).unwrap()
    }

    #[test]
    fn test_missing_context_fails_closed_for_every_kind() {
        let enforcer = IsolationEnforcer::new();
        let ops = [
            Operation::Create,
            Operation::Read,
            Operation::Update,
            Operation::Delete,
            Operation::Search,
        ];
        for kind in EntityKind::ALL {
            for op in ops {
                let err = enforcer.enforce(None, kind, op).unwrap_err();
                assert!(matches!(err, TenantError::ContextMissing { .. }));
            }
        }
    }

    #[test]
    fn test_member_is_scoped_to_own_tenant() {
        let ctx = member("t1");
        let scoped = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::Invoice, Operation::Search)
            .unwrap();
        assert_eq!(scoped.tenant_param(), Some("t1"));
        assert!(scoped.admits(&TenantId::new("t1")));
        assert!(!scoped.admits(&TenantId::new("t2")));
    }

    #[test]
    fn test_unscoped_privileged_read() {
        let ctx = build_context(Some(&Principal::privileged("root", None))).unwrap();
        let scoped = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::Patient, Operation::Read)
            .unwrap();
        assert_eq!(scoped.scope(), &Scope::Unscoped);
        assert_eq!(scoped.tenant_param(), None);
        assert!(scoped.admits(&TenantId::new("anything")));
    }

    #[test]
    fn test_unscoped_create_requires_tenant() {
        let ctx = build_context(Some(&Principal::privileged("root", None))).unwrap();
        let scoped = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::Patient, Operation::Create)
            .unwrap();
        assert!(matches!(
            scoped.write_tenant(),
            Err(TenantError::TenantRequired { .. })
        ));
    }

    #[test]
    fn test_cross_tenant_owner_is_denied() {
        let ctx = member("t1");
        let scoped = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::Patient, Operation::Read)
            .unwrap();
        let err = scoped
            .authorize_owner(&TenantId::new("t2"), "p-9")
            .unwrap_err();
        assert!(matches!(err, TenantError::CrossTenantDenied { .. }));
    }

    #[test]
    fn test_resolve_via_parent() {
        let ctx = member("t1");
        let scoped = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::InvoiceLine, Operation::Create)
            .unwrap();

        let owner = scoped
            .resolve_via_parent(Some(TenantId::new("t1")), "inv-1")
            .unwrap();
        assert_eq!(owner, TenantId::new("t1"));

        let foreign = scoped
            .resolve_via_parent(Some(TenantId::new("t2")), "inv-2")
            .unwrap_err();
        assert!(foreign.is_not_found());

        let missing = scoped.resolve_via_parent(None, "inv-3").unwrap_err();
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_tenant_writes_need_privilege() {
        let ctx = member("t1");
        let err = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::Tenant, Operation::Update)
            .unwrap_err();
        assert!(matches!(err, TenantError::PrivilegeRequired { .. }));

        assert!(
            IsolationEnforcer
                .enforce(Some(&ctx), EntityKind::Tenant, Operation::Read)
                .is_ok()
        );
    }

    #[test]
    fn test_permissions_are_checked() {
        let principal = Principal::member("u1", TenantId::new("t1"))
            .with_permissions(TenantPermissions::read_only());
        let ctx = build_context(Some(&principal)).unwrap();
        let err = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::Patient, Operation::Delete)
            .unwrap_err();
        assert!(matches!(err, TenantError::OperationNotPermitted { .. }));
    }

    #[test]
    fn test_derived_scope_keeps_tenant_and_principal() {
        let ctx = member("t1");
        let line = IsolationEnforcer
            .enforce(Some(&ctx), EntityKind::InvoiceLine, Operation::Create)
            .unwrap();
        let total = line.derived(EntityKind::Invoice);
        assert_eq!(total.entity(), EntityKind::Invoice);
        assert_eq!(total.operation(), Operation::Update);
        assert_eq!(total.tenant_param(), Some("t1"));
        assert_eq!(total.principal_id(), line.principal_id());
    }
}
