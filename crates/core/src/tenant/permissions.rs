//! Permission model for tenant contexts.
//!
//! Scoping decides *which* rows a context sees; permissions decide *what* it
//! may do with them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::entity::EntityKind;

/// Operations that can be performed on records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert new records.
    Create,
    /// Read a single record.
    Read,
    /// Modify existing records.
    Update,
    /// Remove records.
    Delete,
    /// List or search records.
    Search,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Search => write!(f, "search"),
        }
    }
}

impl Operation {
    /// Returns `true` for operations that mutate state.
    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update | Operation::Delete)
    }
}

/// Permissions granted to a tenant context.
///
/// # Examples
///
/// ```
/// use carebase_core::tenant::{EntityKind, Operation, TenantPermissions};
///
/// let full = TenantPermissions::full_access();
/// assert!(full.can_perform(Operation::Create, EntityKind::Patient));
///
/// let read_only = TenantPermissions::read_only();
/// assert!(read_only.can_perform(Operation::Search, EntityKind::Patient));
/// assert!(!read_only.can_perform(Operation::Update, EntityKind::Patient));
///
/// let front_desk = TenantPermissions::builder()
///     .allow_operations(vec![Operation::Read, Operation::Create])
///     .allow_entities(vec![EntityKind::Patient, EntityKind::Appointment])
///     .build();
/// assert!(!front_desk.can_perform(Operation::Read, EntityKind::Invoice));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPermissions {
    /// Allowed operations. If None, all operations are allowed.
    allowed_operations: Option<HashSet<Operation>>,

    /// Allowed entity kinds. If None, all kinds are allowed.
    allowed_entities: Option<HashSet<EntityKind>>,
}

impl TenantPermissions {
    /// Creates permissions with full access to all operations and entity kinds.
    pub fn full_access() -> Self {
        Self {
            allowed_operations: None,
            allowed_entities: None,
        }
    }

    /// Creates read-only permissions (read and search only).
    pub fn read_only() -> Self {
        let mut ops = HashSet::new();
        ops.insert(Operation::Read);
        ops.insert(Operation::Search);

        Self {
            allowed_operations: Some(ops),
            allowed_entities: None,
        }
    }

    /// Creates a builder for custom permissions.
    pub fn builder() -> TenantPermissionsBuilder {
        TenantPermissionsBuilder::new()
    }

    /// Returns `true` if the given operation is permitted on the given kind.
    pub fn can_perform(&self, operation: Operation, entity: EntityKind) -> bool {
        if let Some(ref allowed_ops) = self.allowed_operations {
            if !allowed_ops.contains(&operation) {
                return false;
            }
        }

        if let Some(ref allowed) = self.allowed_entities {
            if !allowed.contains(&entity) {
                return false;
            }
        }

        true
    }

    /// Returns the set of allowed operations, or None if all are allowed.
    pub fn allowed_operations(&self) -> Option<&HashSet<Operation>> {
        self.allowed_operations.as_ref()
    }

    /// Returns the set of allowed entity kinds, or None if all are allowed.
    pub fn allowed_entities(&self) -> Option<&HashSet<EntityKind>> {
        self.allowed_entities.as_ref()
    }
}

impl Default for TenantPermissions {
    fn default() -> Self {
        Self::full_access()
    }
}

/// Builder for creating custom tenant permissions.
#[derive(Default)]
pub struct TenantPermissionsBuilder {
    allowed_operations: Option<HashSet<Operation>>,
    allowed_entities: Option<HashSet<EntityKind>>,
}

impl TenantPermissionsBuilder {
    /// Creates a new builder with no restrictions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the allowed operations.
    pub fn allow_operations(mut self, operations: Vec<Operation>) -> Self {
        self.allowed_operations = Some(operations.into_iter().collect());
        self
    }

    /// Sets the allowed entity kinds.
    pub fn allow_entities(mut self, entities: Vec<EntityKind>) -> Self {
        self.allowed_entities = Some(entities.into_iter().collect());
        self
    }

    /// Builds the permissions.
    pub fn build(self) -> TenantPermissions {
        TenantPermissions {
            allowed_operations: self.allowed_operations,
            allowed_entities: self.allowed_entities,
        }
    }
}
