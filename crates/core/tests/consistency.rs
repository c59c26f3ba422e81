//! Derived-value tests.
//!
//! Invoice totals, commission amounts, stock levels, search tokens and
//! practitioner slots are maintained by the core; these tests check them
//! through the public request API only.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use carebase_core::error::{ConsistencyError, CoreError};
use carebase_core::tenant::{EntityKind, Operation, TenantPermissions};
use carebase_core::types::{
    AppointmentStatus, InvoiceLineUpdate, MedicalActUpdate, NewAppointment, NewEncounter,
    NewInventoryItem, NewInvoice, NewInvoiceLine, NewLedgerEntry, NewMedicalAct, NewPatient,
    PatientUpdate,
};
use carebase_core::{Principal, RequestScope};

use common::Harness;

fn line(invoice_id: &str, description: &str, quantity: Decimal, unit_price: Decimal) -> NewInvoiceLine {
    NewInvoiceLine {
        invoice_id: invoice_id.to_string(),
        description: description.to_string(),
        quantity,
        unit_price,
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

fn slot(patient_id: &str, practitioner: &str, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> NewAppointment {
    NewAppointment {
        patient_id: patient_id.to_string(),
        practitioner_id: practitioner.to_string(),
        starts_at,
        ends_at,
    }
}

async fn setup() -> (Harness, Principal, String) {
    let h = Harness::in_memory();
    let (_, member) = h.tenant("clinic-a");
    let patient = h.patient(&member, "Paula Uno").await;
    (h, member, patient.id)
}

fn item(scope: &RequestScope, sku: &str) -> String {
    scope
        .create_inventory_item(&NewInventoryItem {
            sku: sku.to_string(),
            name: format!("Item {sku}"),
        })
        .expect("Failed to create inventory item")
        .id
}

// ============================================================================
// Invoice Total Tests
// ============================================================================

/// Test that the total follows line inserts and deletes.
#[tokio::test]
async fn test_invoice_total_follows_lines() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let invoice = scope
        .create_invoice(&NewInvoice { patient_id })
        .unwrap();
    assert_eq!(invoice.total, Decimal::ZERO);

    let first = scope
        .add_invoice_line(&line(&invoice.id, "Consultation", dec!(2), dec!(50.00)))
        .unwrap();
    scope
        .add_invoice_line(&line(&invoice.id, "Bandage", dec!(1), dec!(25.00)))
        .unwrap();
    assert_eq!(scope.get_invoice(&invoice.id).unwrap().unwrap().total, dec!(125.00));

    let after_delete = scope.remove_invoice_line(&first.id).unwrap();
    assert_eq!(after_delete.total, dec!(25.00));
    assert_eq!(scope.list_invoice_lines(&invoice.id).unwrap().len(), 1);
}

/// Test that recomputing a total is idempotent.
#[tokio::test]
async fn test_recompute_is_idempotent() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let invoice = scope.create_invoice(&NewInvoice { patient_id }).unwrap();
    scope
        .add_invoice_line(&line(&invoice.id, "X-ray", dec!(1), dec!(80.10)))
        .unwrap();
    scope
        .add_invoice_line(&line(&invoice.id, "Gauze", dec!(3), dec!(0.30)))
        .unwrap();

    let once = scope.recompute_invoice(&invoice.id).unwrap();
    let twice = scope.recompute_invoice(&invoice.id).unwrap();
    assert_eq!(once.total, dec!(81.00));
    assert_eq!(once.total, twice.total);
    assert_eq!(once.updated_at, twice.updated_at);
}

/// Test that editing a line updates the total and the line amount.
#[tokio::test]
async fn test_line_update_recomputes_total() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let invoice = scope.create_invoice(&NewInvoice { patient_id }).unwrap();
    let added = scope
        .add_invoice_line(&line(&invoice.id, "Consultation", dec!(1), dec!(40.00)))
        .unwrap();
    assert_eq!(added.line_total, dec!(40.00));

    let updated = scope
        .update_invoice_line(
            &added.id,
            &InvoiceLineUpdate {
                quantity: Some(dec!(3)),
                ..InvoiceLineUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.line_total, dec!(120.00));
    assert_eq!(scope.get_invoice(&invoice.id).unwrap().unwrap().total, dec!(120.00));
}

/// Test that invalid lines are refused without touching the total.
#[tokio::test]
async fn test_invalid_line_is_refused() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let invoice = scope.create_invoice(&NewInvoice { patient_id }).unwrap();
    let err = scope
        .add_invoice_line(&line(&invoice.id, "Nothing", dec!(0), dec!(10.00)))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Consistency(ConsistencyError::InvalidQuantity { .. })
    ));
    assert!(scope.list_invoice_lines(&invoice.id).unwrap().is_empty());
    assert_eq!(scope.get_invoice(&invoice.id).unwrap().unwrap().total, Decimal::ZERO);
}

/// Test that replaying the same line sequence on a fresh invoice yields the
/// same total.
#[tokio::test]
async fn test_replayed_sequence_yields_same_total() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let mut totals = Vec::new();
    for _ in 0..2 {
        let invoice = scope
            .create_invoice(&NewInvoice {
                patient_id: patient_id.clone(),
            })
            .unwrap();
        let first = scope
            .add_invoice_line(&line(&invoice.id, "Consultation", dec!(2), dec!(50)))
            .unwrap();
        scope
            .add_invoice_line(&line(&invoice.id, "Bandage", dec!(1), dec!(25)))
            .unwrap();
        scope.remove_invoice_line(&first.id).unwrap();
        totals.push(scope.get_invoice(&invoice.id).unwrap().unwrap().total);
    }
    assert_eq!(totals, vec![dec!(25.00), dec!(25.00)]);
}

/// Test that amounts too large for a decimal are refused, not computed.
#[tokio::test]
async fn test_amount_overflow_is_refused() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);
    let invoice = scope.create_invoice(&NewInvoice { patient_id }).unwrap();

    let err = scope
        .add_invoice_line(&line(&invoice.id, "Implant", dec!(2), Decimal::MAX))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Consistency(ConsistencyError::AmountOverflow { .. })
    ));

    scope
        .add_invoice_line(&line(&invoice.id, "Implant", dec!(1), Decimal::MAX))
        .unwrap();
    let err = scope
        .add_invoice_line(&line(&invoice.id, "Implant", dec!(1), dec!(1)))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Consistency(ConsistencyError::AmountOverflow { .. })
    ));

    assert_eq!(scope.list_invoice_lines(&invoice.id).unwrap().len(), 1);
    assert_eq!(scope.get_invoice(&invoice.id).unwrap().unwrap().total, Decimal::MAX);
}

/// Test that adding a line does not need update rights on the invoice.
#[tokio::test]
async fn test_line_clerk_recomputes_total() {
    let (h, member, patient_id) = setup().await;
    let invoice = h
        .scope(&member)
        .create_invoice(&NewInvoice { patient_id })
        .unwrap();

    let clerk = Principal::member("clerk-a", member.tenant_id().unwrap().clone()).with_permissions(
        TenantPermissions::builder()
            .allow_operations(vec![Operation::Create, Operation::Read, Operation::Search])
            .allow_entities(vec![EntityKind::InvoiceLine, EntityKind::Invoice])
            .build(),
    );
    let scope = h.scope(&clerk);
    scope
        .add_invoice_line(&line(&invoice.id, "Consultation", dec!(1), dec!(100)))
        .unwrap();

    assert_eq!(scope.get_invoice(&invoice.id).unwrap().unwrap().total, dec!(100.00));
    assert!(scope.recompute_invoice(&invoice.id).is_err());
}

// ============================================================================
// Commission Tests
// ============================================================================

/// Test that commission amounts are always derived, never taken from input.
#[tokio::test]
async fn test_commission_is_derived() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let encounter = scope
        .open_encounter(NewEncounter::new(patient_id, "checkup"))
        .await
        .unwrap();

    let mut new = NewMedicalAct::new(
        encounter.id.clone(),
        "Suture",
        dec!(100.00),
        dec!(0.15),
        dec!(0.05),
    );
    new.internal_amount = Some(dec!(999.00));
    new.external_amount = Some(dec!(-1.00));

    let act = scope.record_medical_act(&new).unwrap();
    assert_eq!(act.internal_amount, dec!(15.00));
    assert_eq!(act.external_amount, dec!(5.00));

    let updated = scope
        .update_medical_act(
            &act.id,
            &MedicalActUpdate {
                price: Some(dec!(200.00)),
                internal_amount: Some(dec!(0)),
                ..MedicalActUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(updated.internal_amount, dec!(30.00));
    assert_eq!(updated.external_amount, dec!(10.00));

    let stored = scope.get_medical_act(&act.id).unwrap().unwrap();
    assert_eq!(stored.price, dec!(200.00));
    assert_eq!(stored.internal_amount, dec!(30.00));
    assert_eq!(stored.external_amount, dec!(10.00));
}

/// Test that rates outside 0..=1 are refused.
#[tokio::test]
async fn test_invalid_rate_is_refused() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);
    let encounter = scope
        .open_encounter(NewEncounter::new(patient_id, "checkup"))
        .await
        .unwrap();

    let err = scope
        .record_medical_act(&NewMedicalAct::new(
            encounter.id.clone(),
            "Suture",
            dec!(100.00),
            dec!(1.5),
            dec!(0),
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Consistency(ConsistencyError::InvalidRate { .. })
    ));
    assert!(scope.list_medical_acts(&encounter.id).unwrap().is_empty());
}

// ============================================================================
// Stock Tests
// ============================================================================

/// Test that stock never goes negative and always matches the ledger.
#[tokio::test]
async fn test_stock_follows_ledger() {
    let (h, member, _) = setup().await;
    let scope = h.scope(&member);
    let item_id = item(&scope, "GLV-01");

    scope
        .record_stock_movement(&NewLedgerEntry::inbound(item_id.clone(), 10))
        .unwrap();

    let err = scope
        .record_stock_movement(&NewLedgerEntry::outbound(item_id.clone(), 15))
        .unwrap_err();
    assert!(err.is_conflict());
    match err {
        CoreError::Consistency(ConsistencyError::InsufficientStock {
            available,
            requested,
            ..
        }) => {
            assert_eq!(available, 10);
            assert_eq!(requested, 15);
        }
        other => panic!("Expected InsufficientStock error, got {:?}", other),
    }
    assert_eq!(scope.get_inventory_item(&item_id).unwrap().unwrap().stock, 10);
    assert_eq!(scope.list_ledger_entries(&item_id).unwrap().len(), 1);

    scope
        .record_stock_movement(&NewLedgerEntry::outbound(item_id.clone(), 10))
        .unwrap();
    let stock = scope.get_inventory_item(&item_id).unwrap().unwrap().stock;
    assert_eq!(stock, 0);
    assert_eq!(scope.ledger_balance(&item_id).unwrap(), stock);

    let entries = scope.list_ledger_entries(&item_id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.iter().map(|e| e.delta()).sum::<i64>(), stock);
    assert_eq!(entries[0].principal_id, *member.id());
}

/// Test that non-positive movements are refused.
#[tokio::test]
async fn test_non_positive_movement_is_refused() {
    let (h, member, _) = setup().await;
    let scope = h.scope(&member);
    let item_id = item(&scope, "GLV-02");

    for quantity in [0, -3] {
        let err = scope
            .record_stock_movement(&NewLedgerEntry::inbound(item_id.clone(), quantity))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Consistency(ConsistencyError::InvalidQuantity { .. })
        ));
    }
    assert!(scope.list_ledger_entries(&item_id).unwrap().is_empty());
}

/// Test that SKUs are unique within a tenant only.
#[tokio::test]
async fn test_sku_unique_per_tenant() {
    let (h, member, _) = setup().await;
    let (_, other) = h.tenant("clinic-b");

    item(&h.scope(&member), "GLV-01");
    let err = h
        .scope(&member)
        .create_inventory_item(&NewInventoryItem {
            sku: "GLV-01".to_string(),
            name: "Duplicate".to_string(),
        })
        .unwrap_err();
    assert!(err.is_conflict());

    item(&h.scope(&other), "GLV-01");
}

// ============================================================================
// Search Index Tests
// ============================================================================

/// Test that patients are found by name or document prefix.
#[tokio::test]
async fn test_patient_search() {
    let h = Harness::in_memory();
    let (_, member) = h.tenant("clinic-a");
    let scope = h.scope(&member);

    let maria = scope
        .create_patient(NewPatient::named("María José Pérez").document("12.345.678-9"))
        .await
        .unwrap();
    scope
        .create_patient(NewPatient::named("Mario Rossi"))
        .await
        .unwrap();

    assert_eq!(scope.search_patients("mar").await.unwrap().len(), 2);

    let by_document = scope.search_patients("123456").await.unwrap();
    assert_eq!(by_document.len(), 1);
    assert_eq!(by_document[0].id, maria.id);

    let by_accent = scope.search_patients("PÉR").await.unwrap();
    assert_eq!(by_accent.len(), 1);

    assert!(scope.search_patients("   ").await.unwrap().is_empty());
}

/// Test that renaming a patient replaces its search tokens.
#[tokio::test]
async fn test_search_index_follows_updates() {
    let h = Harness::in_memory();
    let (_, member) = h.tenant("clinic-a");
    let scope = h.scope(&member);

    let patient = scope
        .create_patient(NewPatient::named("Ana Lima"))
        .await
        .unwrap();
    scope
        .update_patient(
            &patient.id,
            PatientUpdate {
                full_name: Some("Ana Souza".to_string()),
                ..PatientUpdate::default()
            },
        )
        .await
        .unwrap();

    assert!(scope.search_patients("lima").await.unwrap().is_empty());
    assert_eq!(scope.search_patients("souza").await.unwrap().len(), 1);
}

/// Test that search never crosses tenants.
#[tokio::test]
async fn test_search_is_tenant_scoped() {
    let h = Harness::in_memory();
    let (_, alice) = h.tenant("clinic-a");
    let (_, bob) = h.tenant("clinic-b");
    h.patient(&alice, "Ana Lima").await;
    h.patient(&bob, "Ana Souza").await;

    let found = h.scope(&alice).search_patients("ana").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].full_name, "Ana Lima");
}

// ============================================================================
// Scheduling Tests
// ============================================================================

/// Test that overlapping bookings of one practitioner are refused.
#[tokio::test]
async fn test_double_booking_is_refused() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let first = scope
        .book_appointment(&slot(&patient_id, "dr-house", at(9, 0), at(10, 0)))
        .unwrap();

    let err = scope
        .book_appointment(&slot(&patient_id, "dr-house", at(9, 30), at(10, 30)))
        .unwrap_err();
    assert!(err.is_conflict());
    match err {
        CoreError::Consistency(ConsistencyError::DoubleBooked { conflicting_id, .. }) => {
            assert_eq!(conflicting_id, first.id);
        }
        other => panic!("Expected DoubleBooked error, got {:?}", other),
    }

    // Back-to-back and other practitioners are fine.
    scope
        .book_appointment(&slot(&patient_id, "dr-house", at(10, 0), at(11, 0)))
        .unwrap();
    scope
        .book_appointment(&slot(&patient_id, "dr-wilson", at(9, 30), at(10, 30)))
        .unwrap();

    assert_eq!(scope.list_appointments(Some("dr-house")).unwrap().len(), 2);
}

/// Test that cancelling frees the slot.
#[tokio::test]
async fn test_cancel_frees_slot() {
    let (h, member, patient_id) = setup().await;
    let scope = h.scope(&member);

    let booked = scope
        .book_appointment(&slot(&patient_id, "dr-house", at(9, 0), at(10, 0)))
        .unwrap();
    let cancelled = scope.cancel_appointment(&booked.id).unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(
        scope.cancel_appointment(&booked.id).unwrap().status,
        AppointmentStatus::Cancelled
    );

    scope
        .book_appointment(&slot(&patient_id, "dr-house", at(9, 15), at(9, 45)))
        .unwrap();
}

/// Test that empty or inverted slots are refused.
#[tokio::test]
async fn test_inverted_slot_is_refused() {
    let (h, member, patient_id) = setup().await;

    let err = h
        .scope(&member)
        .book_appointment(&slot(&patient_id, "dr-house", at(10, 0), at(10, 0)))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Consistency(ConsistencyError::InvalidSchedule)
    ));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

/// Test that concurrent line inserts all land in the total.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lines_keep_total_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::on_disk(&dir.path().join("carebase.db"));
    let (_, member) = h.tenant("clinic-a");
    let patient = h.patient(&member, "Paula Uno").await;
    let invoice = h
        .scope(&member)
        .create_invoice(&NewInvoice {
            patient_id: patient.id,
        })
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..10 {
        let scope = h.scope(&member);
        let invoice_id = invoice.id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            scope.add_invoice_line(&line(&invoice_id, &format!("Line {n}"), dec!(1), dec!(10.00)))
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let scope = h.scope(&member);
    assert_eq!(scope.list_invoice_lines(&invoice.id).unwrap().len(), 10);
    assert_eq!(scope.get_invoice(&invoice.id).unwrap().unwrap().total, dec!(100.00));
}

/// Test that concurrent withdrawals never oversell.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_oversell() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::on_disk(&dir.path().join("carebase.db"));
    let (_, member) = h.tenant("clinic-a");
    let scope = h.scope(&member);
    let item_id = item(&scope, "GLV-01");
    scope
        .record_stock_movement(&NewLedgerEntry::inbound(item_id.clone(), 5))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let scope = h.scope(&member);
        let item_id = item_id.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            scope.record_stock_movement(&NewLedgerEntry::outbound(item_id, 1))
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 5);
    assert_eq!(scope.get_inventory_item(&item_id).unwrap().unwrap().stock, 0);
    assert_eq!(scope.ledger_balance(&item_id).unwrap(), 0);
}
