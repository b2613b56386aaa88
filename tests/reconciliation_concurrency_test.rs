mod common;

use medcab_api::entities::{dispense_unit, usage_claim, ClaimOutcome, ItemStatus};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use common::{at, delta, return_claim, usage_claim as usage, TestApp};

#[tokio::test]
async fn concurrent_distinct_claims_drain_one_unit() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 10).await;

    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            10,
            Some("RFID-CC-1"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    let mut tasks = Vec::new();
    for i in 0..10 {
        let recon = app.reconciliation();
        tasks.push(tokio::spawn(async move {
            recon
                .record_usage(usage(
                    &format!("INV-CC-{}", i),
                    "KIT-SUTURE",
                    1,
                    Some("RFID-CC-1"),
                    Some(at(2026, 3, 9, 10, 0)),
                ))
                .await
        }));
    }

    let mut applied = 0;
    for task in tasks {
        let result = task.await.expect("task join").expect("claim succeeds");
        if result.outcome == ClaimOutcome::Applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 10);

    let unit = dispense_unit::Entity::find()
        .filter(dispense_unit::Column::UnitId.eq("RFID-CC-1"))
        .one(app.state.db.as_ref())
        .await
        .expect("unit query")
        .expect("unit exists");
    assert_eq!(unit.qty_used, 10);
    assert_eq!(unit.qty_pending, 0);
    assert_eq!(unit.status, ItemStatus::Completed);
    assert!(unit.conserves_quantity());

    let row = app
        .reporting()
        .get_comparison("KIT-SUTURE", common::day(2026, 3, 9))
        .await
        .expect("window exists");
    assert_eq!(row.row.total_used, 10);
    assert_eq!(row.row.total_pending, 0);
}

#[tokio::test]
async fn racing_replays_of_one_reference_insert_a_single_claim() {
    let app = TestApp::new().await;
    app.seed_item("MESH-HER-L", true).await;
    app.stock("MESH-HER-L", 5).await;

    app.ledger()
        .append_delta(delta(
            "MESH-HER-L",
            "take",
            5,
            Some("RFID-CC-2"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let recon = app.reconciliation();
        tasks.push(tokio::spawn(async move {
            recon
                .record_usage(usage(
                    "INV-CC-RACE",
                    "MESH-HER-L",
                    2,
                    Some("RFID-CC-2"),
                    Some(at(2026, 3, 9, 10, 0)),
                ))
                .await
        }));
    }

    let mut applied = 0;
    let mut duplicates = 0;
    for task in tasks {
        let result = task.await.expect("task join").expect("claim answers");
        match result.outcome {
            ClaimOutcome::Applied => applied += 1,
            ClaimOutcome::Duplicate => duplicates += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(applied, 1, "exactly one racer lands the claim");
    assert_eq!(duplicates, 4);

    let stored = usage_claim::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .expect("claim count");
    assert_eq!(stored, 1);

    // The quantity applied exactly once.
    let unit = dispense_unit::Entity::find()
        .filter(dispense_unit::Column::UnitId.eq("RFID-CC-2"))
        .one(app.state.db.as_ref())
        .await
        .expect("unit query")
        .expect("unit exists");
    assert_eq!(unit.qty_used, 2);
    assert_eq!(unit.qty_pending, 3);
}

#[tokio::test]
async fn interleaved_usage_and_returns_conserve_quantity() {
    let app = TestApp::new().await;
    app.seed_item("STAP-LIN-60", true).await;
    app.stock("STAP-LIN-60", 8).await;

    app.ledger()
        .append_delta(delta(
            "STAP-LIN-60",
            "take",
            8,
            Some("RFID-CC-3"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    let mut tasks = Vec::new();
    for i in 0..4 {
        let recon = app.reconciliation();
        tasks.push(tokio::spawn(async move {
            recon
                .record_usage(usage(
                    &format!("INV-MIX-{}", i),
                    "STAP-LIN-60",
                    1,
                    Some("RFID-CC-3"),
                    Some(at(2026, 3, 9, 10, 0)),
                ))
                .await
                .map(|r| r.outcome)
        }));
    }
    for i in 0..4 {
        let recon = app.reconciliation();
        tasks.push(tokio::spawn(async move {
            recon
                .record_return(return_claim(
                    &format!("RET-MIX-{}", i),
                    "STAP-LIN-60",
                    1,
                    Some("RFID-CC-3"),
                    Some(at(2026, 3, 9, 11, 0)),
                ))
                .await
                .map(|r| r.outcome)
        }));
    }

    for task in tasks {
        let outcome = task.await.expect("task join").expect("claim succeeds");
        assert_eq!(outcome, ClaimOutcome::Applied);
    }

    let unit = dispense_unit::Entity::find()
        .filter(dispense_unit::Column::UnitId.eq("RFID-CC-3"))
        .one(app.state.db.as_ref())
        .await
        .expect("unit query")
        .expect("unit exists");
    assert_eq!(unit.qty_used, 4);
    assert_eq!(unit.qty_returned, 4);
    assert_eq!(unit.qty_pending, 0);
    assert!(unit.conserves_quantity());

    let row = app
        .reporting()
        .get_comparison("STAP-LIN-60", common::day(2026, 3, 9))
        .await
        .expect("window exists");
    assert_eq!(row.row.total_used, 4);
    assert_eq!(row.row.total_returned, 4);
    assert_eq!(
        row.row.status,
        medcab_api::entities::ComparisonStatus::Matched
    );
}
