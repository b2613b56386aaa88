mod common;

use medcab_api::commands::admin::rebuild_windows_command::RebuildWindowsCommand;
use medcab_api::entities::{comparison_row, ComparisonStatus};
use medcab_api::errors::ServiceError;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use common::{at, day, delta, usage_claim, TestApp};

#[tokio::test]
async fn rebuild_recounts_every_touched_key() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.seed_item("MESH-HER-L", true).await;
    app.stock("KIT-SUTURE", 4).await;

    // Two windows for the suture kit, one for the mesh via an orphan claim.
    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            1,
            Some("RFID-RB-1"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("first take");
    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            1,
            Some("RFID-RB-2"),
            Some(at(2026, 3, 10, 8, 0)),
        ))
        .await
        .expect("second take");
    app.reconciliation()
        .record_usage(usage_claim(
            "INV-RB-1",
            "MESH-HER-L",
            1,
            None,
            Some(at(2026, 3, 9, 9, 0)),
        ))
        .await
        .expect("orphan claim records");

    let result = app
        .reconciliation()
        .rebuild_windows(RebuildWindowsCommand {
            from: day(2026, 3, 1),
            to: day(2026, 3, 31),
            item_code: None,
        })
        .await
        .expect("rebuild runs");

    assert_eq!(result.rows, 3);
    assert_eq!(result.from, day(2026, 3, 1));
    assert_eq!(result.to, day(2026, 3, 31));
}

#[tokio::test]
async fn rebuild_refreshes_rows_left_stale_by_lookback_matching() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 1).await;

    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            1,
            Some("RFID-RB-3"),
            Some(at(2026, 3, 9, 23, 30)),
        ))
        .await
        .expect("take should append");

    let with_lookback = medcab_api::services::ReconciliationService::new(
        app.state.db.clone(),
        std::sync::Arc::new(app.state.event_sender.clone()),
        Some(24),
    );
    with_lookback
        .record_usage(usage_claim(
            "INV-RB-2",
            "KIT-SUTURE",
            1,
            None,
            Some(at(2026, 3, 10, 0, 30)),
        ))
        .await
        .expect("lookback usage applies");

    // The dispense day still carries the pending tally it had at take time.
    let stale = app
        .reporting()
        .get_comparison("KIT-SUTURE", day(2026, 3, 9))
        .await
        .expect("dispense-day row exists");
    assert_eq!(stale.row.total_pending, 1);

    app.reconciliation()
        .rebuild_windows(RebuildWindowsCommand {
            from: day(2026, 3, 9),
            to: day(2026, 3, 10),
            item_code: Some("KIT-SUTURE".to_string()),
        })
        .await
        .expect("rebuild runs");

    let fresh = app
        .reporting()
        .get_comparison("KIT-SUTURE", day(2026, 3, 9))
        .await
        .expect("dispense-day row exists");
    assert_eq!(fresh.row.total_pending, 0);
    assert_eq!(fresh.row.total_dispensed, 1);
    assert_eq!(fresh.row.status, ComparisonStatus::DispensedNotUsed);
    assert!(fresh.row.version > stale.row.version);
}

#[tokio::test]
async fn item_scoped_rebuild_leaves_other_items_alone() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.seed_item("MESH-HER-L", true).await;
    app.stock("KIT-SUTURE", 1).await;

    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            1,
            Some("RFID-RB-4"),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");
    app.reconciliation()
        .record_usage(usage_claim(
            "INV-RB-3",
            "MESH-HER-L",
            1,
            None,
            Some(at(2026, 3, 9, 9, 0)),
        ))
        .await
        .expect("orphan claim records");

    let mesh_before = comparison_row::Entity::find()
        .filter(comparison_row::Column::ItemCode.eq("MESH-HER-L"))
        .one(app.state.db.as_ref())
        .await
        .expect("row query")
        .expect("mesh row exists");

    let result = app
        .reconciliation()
        .rebuild_windows(RebuildWindowsCommand {
            from: day(2026, 3, 1),
            to: day(2026, 3, 31),
            item_code: Some("KIT-SUTURE".to_string()),
        })
        .await
        .expect("rebuild runs");
    assert_eq!(result.rows, 1);

    let mesh_after = comparison_row::Entity::find()
        .filter(comparison_row::Column::ItemCode.eq("MESH-HER-L"))
        .one(app.state.db.as_ref())
        .await
        .expect("row query")
        .expect("mesh row exists");
    assert_eq!(mesh_after.version, mesh_before.version);
}

#[tokio::test]
async fn inverted_range_is_refused() {
    let app = TestApp::new().await;

    let err = app
        .reconciliation()
        .rebuild_windows(RebuildWindowsCommand {
            from: day(2026, 3, 10),
            to: day(2026, 3, 9),
            item_code: None,
        })
        .await
        .expect_err("inverted range");
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn oversized_span_is_refused() {
    let app = TestApp::new().await;

    let err = app
        .reconciliation()
        .rebuild_windows(RebuildWindowsCommand {
            from: day(2025, 1, 1),
            to: day(2026, 12, 31),
            item_code: None,
        })
        .await
        .expect_err("spans beyond a year");
    assert!(matches!(err, ServiceError::ValidationError(_)));
}
