//! Tenants and principals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::{PrincipalId, TenantId};

/// An isolated organization (clinic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Human-readable unique code, e.g. `clinic-north`.
    pub code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// A stored principal. The password digest never leaves storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalRecord {
    pub id: PrincipalId,
    pub tenant_id: Option<TenantId>,
    pub is_privileged: bool,
    pub display_name: String,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a principal.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrincipal {
    pub display_name: String,
    /// Target tenant. Defaults to the caller's tenant.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub is_privileged: bool,
}

impl NewPrincipal {
    pub fn member(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            tenant_id: None,
            is_privileged: false,
        }
    }
}
