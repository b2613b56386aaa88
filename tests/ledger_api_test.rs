mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{read_json, TestApp};

#[tokio::test]
async fn refill_posts_as_created_without_a_unit() {
    let app = TestApp::new().await;
    app.seed_item("GZE-STER-10", false).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "CAB-01",
                "slot_no": 4,
                "item_code": "GZE-STER-10",
                "sign": "refill",
                "qty": 12,
                "actor_id": "pharmacy-tech-04"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["delta"]["delta_qty"], json!(12));
    assert_eq!(body["data"]["on_hand_after"], json!(12));
    assert!(body["data"]["unit"].is_null());
    assert!(body["data"]["comparison"].is_null());
}

#[tokio::test]
async fn tracked_take_returns_unit_and_comparison() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 6).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "CAB-01",
                "slot_no": 4,
                "item_code": "KIT-SUTURE",
                "sign": "take",
                "qty": 2,
                "unit_id": "RFID-HTTP-1",
                "actor_id": "nurse-17",
                "recorded_at": "2026-03-09T08:00:00Z"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["data"]["delta"]["delta_qty"], json!(-2));
    assert_eq!(body["data"]["on_hand_after"], json!(4));
    assert_eq!(body["data"]["unit"]["unit_id"], json!("RFID-HTTP-1"));
    assert_eq!(body["data"]["unit"]["qty_pending"], json!(2));
    assert_eq!(body["data"]["unit"]["status"], json!("PENDING"));
    assert_eq!(body["data"]["comparison"]["total_dispensed"], json!(2));
    assert_eq!(
        body["data"]["comparison"]["status"],
        json!("DISPENSED_NOT_USED")
    );
}

#[tokio::test]
async fn untracked_take_moves_stock_without_a_unit() {
    let app = TestApp::new().await;
    app.seed_item("GZE-STER-10", false).await;
    app.stock("GZE-STER-10", 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "CAB-01",
                "slot_no": 4,
                "item_code": "GZE-STER-10",
                "sign": "take",
                "qty": 3,
                "actor_id": "nurse-17"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["data"]["on_hand_after"], json!(7));
    assert!(body["data"]["unit"].is_null());
}

#[tokio::test]
async fn invalid_payload_is_rejected_with_field_errors() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "",
                "slot_no": 4,
                "item_code": "KIT-SUTURE",
                "sign": "take",
                "qty": 0,
                "actor_id": "nurse-17"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["success"], json!(false));
    let errors = body["errors"].as_array().expect("field errors listed");
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn unknown_sign_is_an_invalid_delta() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "CAB-01",
                "slot_no": 4,
                "item_code": "KIT-SUTURE",
                "sign": "sideways",
                "qty": 1,
                "actor_id": "nurse-17"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("error message present")
        .contains("sign"));
}

#[tokio::test]
async fn unknown_item_code_is_an_invalid_delta() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "CAB-01",
                "slot_no": 4,
                "item_code": "NOPE-404",
                "sign": "refill",
                "qty": 1,
                "actor_id": "pharmacy-tech-04"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn take_beyond_on_hand_is_refused() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/ledger/deltas",
            Some(json!({
                "cabinet_id": "CAB-01",
                "slot_no": 4,
                "item_code": "KIT-SUTURE",
                "sign": "take",
                "qty": 2,
                "actor_id": "nurse-17"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("error message present")
        .contains("on-hand"));
}

#[tokio::test]
async fn delta_listing_pages_newest_first() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 9).await;

    for (i, qty) in [2, 3].into_iter().enumerate() {
        let response = app
            .request(
                Method::POST,
                "/api/v1/ledger/deltas",
                Some(json!({
                    "cabinet_id": "CAB-01",
                    "slot_no": 4,
                    "item_code": "KIT-SUTURE",
                    "sign": "take",
                    "qty": qty,
                    "unit_id": format!("RFID-LIST-{}", i),
                    "actor_id": "nurse-17",
                    "recorded_at": format!("2026-03-09T0{}:00:00Z", 8 + i)
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .request(
            Method::GET,
            "/api/v1/ledger/deltas?item_code=KIT-SUTURE&sign=take&limit=1",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    let data = &body["data"];
    assert_eq!(data["total"], json!(2));
    assert_eq!(data["page"], json!(1));
    assert_eq!(data["limit"], json!(1));
    assert_eq!(data["total_pages"], json!(2));
    let items = data["items"].as_array().expect("items listed");
    assert_eq!(items.len(), 1);
    // Newest first.
    assert_eq!(items[0]["delta_qty"], json!(-3));
}

#[tokio::test]
async fn on_hand_is_folded_from_history() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 5).await;

    app.ledger()
        .append_delta(common::delta(
            "KIT-SUTURE",
            "take",
            2,
            Some("RFID-OH-1"),
            Some(common::at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");

    let summary = app
        .ledger()
        .on_hand("CAB-01", 4)
        .await
        .expect("on-hand folds");
    assert_eq!(summary.on_hand, 3);
    assert_eq!(summary.delta_count, 2);
    assert!(summary.last_recorded_at.is_some());
}

#[tokio::test]
async fn empty_slot_reports_zero_on_hand() {
    let app = TestApp::new().await;

    let summary = app
        .ledger()
        .on_hand("CAB-99", 1)
        .await
        .expect("empty slot folds");
    assert_eq!(summary.on_hand, 0);
    assert_eq!(summary.delta_count, 0);
    assert!(summary.last_recorded_at.is_none());
}
