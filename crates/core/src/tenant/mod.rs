//! Multitenancy support.
//!
//! Tenant isolation is enforced in two steps:
//!
//! 1. [`build_context`] derives a [`TenantContext`] from the authenticated
//!    [`Principal`] at the start of a request.
//! 2. [`IsolationEnforcer::enforce`] turns that context into a
//!    [`ScopedQuery`] for each data access. Storage code only accepts scoped
//!    queries, and a missing context is always refused.
//!
//! A privileged principal with no attached tenant reads across tenants; any
//! other context is confined to its own tenant on both read and write.

mod context;
mod enforcer;
mod entity;
mod id;
mod permissions;
mod principal;

pub use context::{TenantContext, build_context};
pub use enforcer::{IsolationEnforcer, Scope, ScopedQuery};
pub use entity::{EntityKind, TenancyModel};
pub use id::{PrincipalId, TenantId};
pub use permissions::{Operation, TenantPermissions, TenantPermissionsBuilder};
pub use principal::Principal;
