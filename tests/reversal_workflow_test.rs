mod common;

use medcab_api::commands::claims::record_reversal_command::RecordReversalCommand;
use medcab_api::commands::exceptions::resolve_exception_command::ResolveExceptionCommand;
use medcab_api::entities::{dispense_unit, ClaimKind, ClaimOutcome, ComparisonStatus};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use common::{at, day, delta, return_claim, usage_claim, TestApp};

fn reversal(kind: ClaimKind, item_code: &str, qty: i32) -> RecordReversalCommand {
    RecordReversalCommand {
        claim_kind: kind,
        item_code: item_code.to_string(),
        qty,
        window: day(2026, 3, 9),
        reason: "charge entry error".to_string(),
        filed_by: "pharmacist-02".to_string(),
    }
}

#[tokio::test]
async fn reversal_subtracts_from_window_totals_only() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 4).await;

    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            4,
            Some("RFID-R1"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    let used = app
        .reconciliation()
        .record_usage(usage_claim(
            "INV-2101",
            "KIT-SUTURE",
            3,
            Some("RFID-R1"),
            Some(at(2026, 3, 9, 10, 0)),
        ))
        .await
        .expect("usage applies");
    assert_eq!(used.outcome, ClaimOutcome::Applied);

    let reversed = app
        .reconciliation()
        .record_reversal(reversal(ClaimKind::Usage, "KIT-SUTURE", 2))
        .await
        .expect("reversal files");

    assert_eq!(reversed.reversal.qty, 2);
    assert_eq!(reversed.comparison.total_used, 1);
    assert_eq!(reversed.comparison.total_dispensed, 4);
    assert_eq!(reversed.comparison.difference, 3);
    assert_eq!(
        reversed.comparison.status,
        ComparisonStatus::DispenseExceedsUsage
    );

    // Unit tallies are the physical record and never move on a reversal.
    let unit = dispense_unit::Entity::find()
        .filter(dispense_unit::Column::UnitId.eq("RFID-R1"))
        .one(app.state.db.as_ref())
        .await
        .expect("unit query")
        .expect("unit exists");
    assert_eq!(unit.qty_used, 3);
    assert_eq!(unit.qty_pending, 1);
}

#[tokio::test]
async fn reversal_clamps_window_usage_at_zero() {
    let app = TestApp::new().await;
    app.seed_item("STAP-LIN-60", true).await;
    app.stock("STAP-LIN-60", 2).await;

    app.ledger()
        .append_delta(delta(
            "STAP-LIN-60",
            "take",
            1,
            Some("RFID-R2"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    app.reconciliation()
        .record_usage(usage_claim(
            "INV-2201",
            "STAP-LIN-60",
            1,
            Some("RFID-R2"),
            Some(at(2026, 3, 9, 10, 0)),
        ))
        .await
        .expect("usage applies");

    let reversed = app
        .reconciliation()
        .record_reversal(reversal(ClaimKind::Usage, "STAP-LIN-60", 5))
        .await
        .expect("oversized reversal still files");

    assert_eq!(reversed.comparison.total_used, 0);
    assert_eq!(reversed.comparison.total_dispensed, 1);
    assert_eq!(
        reversed.comparison.status,
        ComparisonStatus::DispensedNotUsed
    );
}

#[tokio::test]
async fn return_reversal_reduces_returned_total() {
    let app = TestApp::new().await;
    app.seed_item("MESH-HER-L", true).await;
    app.stock("MESH-HER-L", 3).await;

    app.ledger()
        .append_delta(delta(
            "MESH-HER-L",
            "take",
            3,
            Some("RFID-R3"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    app.reconciliation()
        .record_return(return_claim(
            "RET-2301",
            "MESH-HER-L",
            2,
            Some("RFID-R3"),
            Some(at(2026, 3, 9, 14, 0)),
        ))
        .await
        .expect("return applies");

    let reversed = app
        .reconciliation()
        .record_reversal(reversal(ClaimKind::Return, "MESH-HER-L", 1))
        .await
        .expect("reversal files");

    assert_eq!(reversed.comparison.total_returned, 1);
    assert_eq!(reversed.comparison.total_used, 0);
}

#[tokio::test]
async fn reversal_against_quiet_window_leaves_a_zeroed_row() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;

    let reversed = app
        .reconciliation()
        .record_reversal(reversal(ClaimKind::Usage, "KIT-SUTURE", 1))
        .await
        .expect("reversal files even with nothing to subtract");

    assert_eq!(reversed.comparison.total_used, 0);
    assert_eq!(reversed.comparison.total_dispensed, 0);
    assert_eq!(reversed.comparison.status, ComparisonStatus::Matched);
}

#[tokio::test]
async fn exception_resolution_is_sticky() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;

    // Orphan usage files the exception we then work.
    let orphan = app
        .reconciliation()
        .record_usage(usage_claim(
            "INV-2401",
            "KIT-SUTURE",
            1,
            None,
            Some(at(2026, 3, 9, 9, 0)),
        ))
        .await
        .expect("orphan usage records");
    let exception_id = orphan.exception_ids[0];

    let resolved = app
        .reconciliation()
        .resolve_exception(ResolveExceptionCommand { exception_id })
        .await
        .expect("resolution succeeds");
    assert!(resolved.exception.resolved);
    assert!(!resolved.already_resolved);

    let again = app
        .reconciliation()
        .resolve_exception(ResolveExceptionCommand { exception_id })
        .await
        .expect("second resolution is a no-op");
    assert!(again.exception.resolved);
    assert!(again.already_resolved);
}

#[tokio::test]
async fn resolving_a_missing_exception_is_not_found() {
    let app = TestApp::new().await;

    let err = app
        .reconciliation()
        .resolve_exception(ResolveExceptionCommand {
            exception_id: uuid::Uuid::new_v4(),
        })
        .await
        .expect_err("unknown exception id");
    assert!(matches!(
        err,
        medcab_api::errors::ServiceError::NotFound(_)
    ));
}
