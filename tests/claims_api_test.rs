mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{at, delta, read_json, TestApp};

async fn take_unit(app: &TestApp, item_code: &str, qty: i32, unit_id: &str) {
    app.ledger()
        .append_delta(delta(
            item_code,
            "take",
            qty,
            Some(unit_id),
            Some(at(2026, 3, 9, 8, 0)),
        ))
        .await
        .expect("take should append");
}

#[tokio::test]
async fn usage_claim_round_trips_through_the_api() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 5).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-1").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/claims/usage",
            Some(json!({
                "source_system_id": "HIS-PROD",
                "external_reference": "INV-API-1",
                "encounter_id": "HN881234/EN02",
                "item_code": "KIT-SUTURE",
                "qty": 2,
                "unit_id": "RFID-API-1",
                "recorded_at": "2026-03-09T10:00:00Z"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["outcome"], json!("APPLIED"));
    assert_eq!(body["data"]["claim_window"], json!("2026-03-09"));
    assert_eq!(body["data"]["applied_unit_ids"], json!(["RFID-API-1"]));
    assert_eq!(body["data"]["comparison"]["status"], json!("MATCHED"));
}

#[tokio::test]
async fn duplicate_usage_claim_comes_back_as_duplicate() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 5).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-2").await;

    let payload = json!({
        "source_system_id": "HIS-PROD",
        "external_reference": "INV-API-2",
        "encounter_id": "HN881234/EN02",
        "item_code": "KIT-SUTURE",
        "qty": 1,
        "unit_id": "RFID-API-2",
        "recorded_at": "2026-03-09T10:00:00Z"
    });

    let first = app
        .request(Method::POST, "/api/v1/claims/usage", Some(payload.clone()))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .request(Method::POST, "/api/v1/claims/usage", Some(payload))
        .await;
    assert_eq!(second.status(), StatusCode::OK);

    let body = read_json(second).await;
    assert_eq!(body["data"]["outcome"], json!("DUPLICATE"));
    assert_eq!(body["data"]["applied_unit_ids"], json!([]));
}

#[tokio::test]
async fn usage_claim_with_unknown_status_is_bad_request() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/claims/usage",
            Some(json!({
                "source_system_id": "HIS-PROD",
                "external_reference": "INV-API-3",
                "encounter_id": "HN881234/EN02",
                "item_code": "KIT-SUTURE",
                "qty": 1,
                "reported_status": "half-open"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("error message present")
        .contains("status"));
}

#[tokio::test]
async fn empty_reference_fails_field_validation() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/claims/usage",
            Some(json!({
                "source_system_id": "HIS-PROD",
                "external_reference": "",
                "encounter_id": "HN881234/EN02",
                "item_code": "KIT-SUTURE",
                "qty": 1
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["success"], json!(false));
    let errors = body["errors"].as_array().expect("field errors listed");
    assert!(errors
        .iter()
        .any(|e| e.as_str().unwrap_or_default().contains("external_reference")));
}

#[tokio::test]
async fn return_claim_round_trips_through_the_api() {
    let app = TestApp::new().await;
    app.seed_item("MESH-HER-L", true).await;
    app.stock("MESH-HER-L", 3).await;
    take_unit(&app, "MESH-HER-L", 3, "RFID-API-4").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/claims/returns",
            Some(json!({
                "source_system_id": "WARD-7",
                "external_reference": "RET-API-1",
                "item_code": "MESH-HER-L",
                "qty": 1,
                "unit_id": "RFID-API-4",
                "reason": "UNWRAPPED_UNUSED",
                "note": "opened in error",
                "recorded_at": "2026-03-09T16:00:00Z"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["data"]["outcome"], json!("APPLIED"));
    assert_eq!(body["data"]["comparison"]["total_returned"], json!(1));
}

#[tokio::test]
async fn reversal_posts_as_created() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 2).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-5").await;

    let usage = app
        .request(
            Method::POST,
            "/api/v1/claims/usage",
            Some(json!({
                "source_system_id": "HIS-PROD",
                "external_reference": "INV-API-5",
                "encounter_id": "HN881234/EN02",
                "item_code": "KIT-SUTURE",
                "qty": 2,
                "unit_id": "RFID-API-5",
                "recorded_at": "2026-03-09T10:00:00Z"
            })),
        )
        .await;
    assert_eq!(usage.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/v1/claims/reversals",
            Some(json!({
                "claim_kind": "usage",
                "item_code": "KIT-SUTURE",
                "qty": 1,
                "window": "2026-03-09",
                "reason": "charge entry error",
                "filed_by": "pharmacist-02"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["data"]["claim_kind"], json!("USAGE"));
    assert_eq!(body["data"]["comparison"]["total_used"], json!(1));
}

#[tokio::test]
async fn comparison_listing_filters_by_status() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 4).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-6").await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/comparisons?status=DISPENSED_NOT_USED&from=2026-03-01&to=2026-03-31",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    let items = body["data"]["items"].as_array().expect("rows listed");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["item_code"], json!("KIT-SUTURE"));
    assert_eq!(items[0]["total_pending"], json!(2));

    let none = app
        .request(Method::GET, "/api/v1/comparisons?status=MATCHED", None)
        .await;
    let body = read_json(none).await;
    assert_eq!(body["data"]["total"], json!(0));
}

#[tokio::test]
async fn unknown_status_filter_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/comparisons?status=SIDEWAYS", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn summary_rolls_up_stored_rows() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 6).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-7").await;

    app.reconciliation()
        .record_usage(common::usage_claim(
            "INV-API-7",
            "KIT-SUTURE",
            2,
            Some("RFID-API-7"),
            Some(at(2026, 3, 9, 10, 0)),
        ))
        .await
        .expect("usage applies");

    let response = app
        .request(Method::GET, "/api/v1/comparisons/summary", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["data"]["windows"], json!(1));
    assert_eq!(body["data"]["total_dispensed"], json!(2));
    assert_eq!(body["data"]["total_used"], json!(2));
    assert_eq!(body["data"]["total_difference"], json!(0));
    let counts = body["data"]["status_counts"]
        .as_array()
        .expect("status counts listed");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0]["status"], json!("MATCHED"));
    assert_eq!(counts[0]["windows"], json!(1));
}

#[tokio::test]
async fn unit_listing_can_narrow_to_open_units() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 4).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-8").await;

    app.ledger()
        .append_delta(delta(
            "KIT-SUTURE",
            "take",
            2,
            Some("RFID-API-9"),
            Some(at(2026, 3, 9, 9, 0)),
        ))
        .await
        .expect("second take");

    app.reconciliation()
        .record_usage(common::usage_claim(
            "INV-API-8",
            "KIT-SUTURE",
            2,
            Some("RFID-API-8"),
            Some(at(2026, 3, 9, 10, 0)),
        ))
        .await
        .expect("usage closes the first unit");

    let response = app
        .request(Method::GET, "/api/v1/units?open_only=true", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    let items = body["data"]["items"].as_array().expect("units listed");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["unit_id"], json!("RFID-API-9"));
    assert_eq!(items[0]["qty_pending"], json!(2));
}

#[tokio::test]
async fn exception_worklist_filters_on_resolution() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;

    // An orphan claim files the only exception.
    app.reconciliation()
        .record_usage(common::usage_claim(
            "INV-API-9",
            "KIT-SUTURE",
            1,
            None,
            Some(at(2026, 3, 9, 9, 0)),
        ))
        .await
        .expect("orphan usage records");

    let open = app
        .request(
            Method::GET,
            "/api/v1/exceptions?resolved=false&reason=UNMATCHED_CLAIM",
            None,
        )
        .await;
    assert_eq!(open.status(), StatusCode::OK);

    let body = read_json(open).await;
    let items = body["data"]["items"].as_array().expect("exceptions listed");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["reason"], json!("UNMATCHED_CLAIM"));
    assert_eq!(items[0]["resolved"], json!(false));

    let closed = app
        .request(Method::GET, "/api/v1/exceptions?resolved=true", None)
        .await;
    let body = read_json(closed).await;
    assert_eq!(body["data"]["total"], json!(0));
}

#[tokio::test]
async fn rebuild_endpoint_reports_touched_rows() {
    let app = TestApp::new().await;
    app.seed_item("KIT-SUTURE", true).await;
    app.stock("KIT-SUTURE", 2).await;
    take_unit(&app, "KIT-SUTURE", 2, "RFID-API-10").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/admin/rebuild-windows",
            Some(json!({
                "from": "2026-03-01",
                "to": "2026-03-31"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["data"]["rows"], json!(1));
}

#[tokio::test]
async fn status_endpoint_does_not_need_state() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], json!("ok"));
}
