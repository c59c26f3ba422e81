//! Tenant context for data access.
//!
//! This module defines [`TenantContext`], the per-request value that every
//! data access needs. It is derived from an authenticated [`Principal`] by
//! [`build_context`] and is immutable for the lifetime of the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::entity::EntityKind;
use super::id::{PrincipalId, TenantId};
use super::permissions::{Operation, TenantPermissions};
use super::principal::Principal;
use crate::error::{TenantError, TransactionError};

/// The tenant context of one request.
///
/// A context is either **scoped** to a single tenant or, for a privileged
/// principal with no attached tenant, **unscoped**. There is no other way to
/// obtain an unscoped context.
///
/// ```
/// use carebase_core::tenant::{build_context, Principal, TenantId};
///
/// let principal = Principal::member("nurse-1", TenantId::new("clinic-a"));
/// let ctx = build_context(Some(&principal)).unwrap();
/// assert_eq!(ctx.tenant_id().map(|t| t.as_str()), Some("clinic-a"));
/// assert!(!ctx.is_unscoped());
///
/// assert!(build_context(None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct TenantContext {
    principal_id: PrincipalId,
    tenant_id: Option<TenantId>,
    privileged: bool,
    permissions: Arc<TenantPermissions>,
    correlation_id: Option<String>,
    deadline: Option<Instant>,
    timeout_ms: u64,
}

/// Derives the tenant context for a request.
///
/// Fails with [`TenantError::Unauthenticated`] when no principal is supplied.
pub fn build_context(principal: Option<&Principal>) -> Result<TenantContext, TenantError> {
    let principal = principal.ok_or(TenantError::Unauthenticated)?;

    Ok(TenantContext {
        principal_id: principal.id().clone(),
        tenant_id: principal.tenant_id().cloned(),
        privileged: principal.is_privileged(),
        permissions: Arc::new(principal.permissions().clone()),
        correlation_id: None,
        deadline: None,
        timeout_ms: 0,
    })
}

impl TenantContext {
    /// Attaches a correlation ID for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Narrows a privileged context to a single tenant.
    ///
    /// Used when an operator provisions data inside a specific tenant.
    pub fn acting_as(&self, tenant_id: TenantId) -> Result<TenantContext, TenantError> {
        if !self.privileged {
            return Err(TenantError::PrivilegeRequired {
                entity: EntityKind::Tenant,
                operation: Operation::Update,
            });
        }
        let mut narrowed = self.clone();
        narrowed.tenant_id = Some(tenant_id);
        Ok(narrowed)
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal_id
    }

    /// The tenant this context is bound to, if any.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// `true` only for a privileged principal with no tenant attached.
    pub fn is_unscoped(&self) -> bool {
        self.privileged && self.tenant_id.is_none()
    }

    pub fn permissions(&self) -> &TenantPermissions {
        &self.permissions
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Checks if the given operation is permitted on the given kind.
    pub fn check_permission(
        &self,
        operation: Operation,
        entity: EntityKind,
    ) -> Result<(), TenantError> {
        if self.permissions.can_perform(operation, entity) {
            Ok(())
        } else {
            Err(TenantError::OperationNotPermitted {
                principal_id: self.principal_id.to_string(),
                entity,
                operation,
            })
        }
    }

    /// Fails with a timeout once the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), TransactionError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(TransactionError::Timeout {
                timeout_ms: self.timeout_ms,
            }),
            _ => Ok(()),
        }
    }
}
