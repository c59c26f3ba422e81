//! Inventory items and their movement ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::{PrincipalId, TenantId};

/// A stocked item. `stock` is only ever changed by ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryItem {
    pub id: String,
    pub tenant_id: TenantId,
    pub sku: String,
    pub name: String,
    pub stock: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInventoryItem {
    pub sku: String,
    pub name: String,
}

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    Inbound,
    Outbound,
}

impl MovementDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementDirection::Inbound => "inbound",
            MovementDirection::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(MovementDirection::Inbound),
            "outbound" => Some(MovementDirection::Outbound),
            _ => None,
        }
    }

    /// Signed stock change for a movement of `quantity` units.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            MovementDirection::Inbound => quantity,
            MovementDirection::Outbound => -quantity,
        }
    }
}

impl fmt::Display for MovementDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub item_id: String,
    /// Owner, resolved through the item.
    pub tenant_id: TenantId,
    pub direction: MovementDirection,
    /// Always positive; the direction carries the sign.
    pub quantity: i64,
    pub reason: Option<String>,
    pub principal_id: PrincipalId,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn delta(&self) -> i64 {
        self.direction.signed(self.quantity)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLedgerEntry {
    pub item_id: String,
    pub direction: MovementDirection,
    pub quantity: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl NewLedgerEntry {
    pub fn inbound(item_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            item_id: item_id.into(),
            direction: MovementDirection::Inbound,
            quantity,
            reason: None,
        }
    }

    pub fn outbound(item_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            item_id: item_id.into(),
            direction: MovementDirection::Outbound,
            quantity,
            reason: None,
        }
    }
}
