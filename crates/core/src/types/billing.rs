//! Invoices and their lines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// An invoice. `total` is maintained by the consistency engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: String,
    pub tenant_id: TenantId,
    pub patient_id: String,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub patient_id: String,
}

/// One line of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceLine {
    pub id: String,
    pub invoice_id: String,
    /// Owner, resolved through the invoice.
    pub tenant_id: TenantId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// `quantity * unit_price`, rounded to cents.
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoiceLine {
    pub invoice_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Changes to an invoice line. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceLineUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}
