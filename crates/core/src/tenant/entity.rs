//! Entity kinds and their tenancy model.
//!
//! Every record the core stores has an [`EntityKind`]. The kind determines how
//! the record is bound to a tenant: directly through a `tenant_id` column, or
//! indirectly through the parent record it hangs off.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How records of a kind are bound to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenancyModel {
    /// The record carries its own `tenant_id`.
    TenantScoped,

    /// The record's tenant is the tenant of its parent record.
    ViaParent(EntityKind),

    /// The record is the tenant itself. Only privileged principals may write
    /// it; other principals may read their own tenant.
    Global,
}

/// The kinds of records managed by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tenant,
    Principal,
    Patient,
    Encounter,
    MedicalAct,
    Invoice,
    InvoiceLine,
    InventoryItem,
    InventoryTransaction,
    Appointment,
    AuditEntry,
}

impl EntityKind {
    /// Every entity kind, in schema order.
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Tenant,
        EntityKind::Principal,
        EntityKind::Patient,
        EntityKind::Encounter,
        EntityKind::MedicalAct,
        EntityKind::Invoice,
        EntityKind::InvoiceLine,
        EntityKind::InventoryItem,
        EntityKind::InventoryTransaction,
        EntityKind::Appointment,
        EntityKind::AuditEntry,
    ];

    /// Returns the stable snake_case name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "tenant",
            EntityKind::Principal => "principal",
            EntityKind::Patient => "patient",
            EntityKind::Encounter => "encounter",
            EntityKind::MedicalAct => "medical_act",
            EntityKind::Invoice => "invoice",
            EntityKind::InvoiceLine => "invoice_line",
            EntityKind::InventoryItem => "inventory_item",
            EntityKind::InventoryTransaction => "inventory_transaction",
            EntityKind::Appointment => "appointment",
            EntityKind::AuditEntry => "audit_entry",
        }
    }

    /// Parses the storage name back into a kind.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Returns how records of this kind are bound to a tenant.
    pub fn tenancy(&self) -> TenancyModel {
        match self {
            EntityKind::Tenant => TenancyModel::Global,
            EntityKind::MedicalAct => TenancyModel::ViaParent(EntityKind::Encounter),
            EntityKind::InvoiceLine => TenancyModel::ViaParent(EntityKind::Invoice),
            EntityKind::InventoryTransaction => TenancyModel::ViaParent(EntityKind::InventoryItem),
            _ => TenancyModel::TenantScoped,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
