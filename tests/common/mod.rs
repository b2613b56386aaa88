#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use medcab_api::{
    commands::claims::record_return_command::RecordReturnCommand,
    commands::claims::record_usage_command::RecordUsageCommand,
    commands::ledger::append_delta_command::AppendDeltaCommand,
    config::AppConfig,
    db,
    entities::{item_master, ReturnReason},
    events::{self, EventSender},
    handlers::AppServices,
    services::{LedgerService, ReconciliationService, ReportingService},
    AppState,
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        // An in-memory database lives and dies with its single pooled
        // connection, so every TestApp gets a private schema.
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender.clone()), &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", medcab_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    pub fn ledger(&self) -> Arc<LedgerService> {
        self.state.ledger_service()
    }

    pub fn reconciliation(&self) -> Arc<ReconciliationService> {
        self.state.reconciliation_service()
    }

    pub fn reporting(&self) -> Arc<ReportingService> {
        self.state.reporting_service()
    }

    /// Issue a request against the in-process router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("request should build");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should answer")
    }

    /// Refill the shared test slot so later takes have stock to draw from.
    /// Booked the day before the scenarios to keep their windows clean.
    pub async fn stock(&self, item_code: &str, qty: i32) {
        self.ledger()
            .append_delta(delta(
                item_code,
                "refill",
                qty,
                None,
                Some(at(2026, 3, 8, 6, 0)),
            ))
            .await
            .expect("refill should append");
    }

    /// Insert a catalog row the scenarios dispense against.
    pub async fn seed_item(&self, item_code: &str, is_tracked: bool) {
        self.seed_item_in(item_code, is_tracked, "ICU").await;
    }

    pub async fn seed_item_in(&self, item_code: &str, is_tracked: bool, department: &str) {
        let now = Utc::now();
        item_master::ActiveModel {
            item_code: Set(item_code.to_string()),
            name: Set(format!("Test item {}", item_code)),
            item_type: Set(Some("CONSUMABLE".to_string())),
            department_code: Set(Some(department.to_string())),
            is_tracked: Set(is_tracked),
            unit_cost: Set(Some(dec!(12.50))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed catalog item");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Decode a response body as JSON.
pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid test timestamp")
}

/// A cabinet-door movement with the boilerplate filled in.
pub fn delta(
    item_code: &str,
    sign: &str,
    qty: i32,
    unit_id: Option<&str>,
    recorded_at: Option<DateTime<Utc>>,
) -> AppendDeltaCommand {
    AppendDeltaCommand {
        cabinet_id: "CAB-01".to_string(),
        slot_no: 4,
        item_code: item_code.to_string(),
        sign: sign.to_string(),
        qty,
        unit_id: unit_id.map(str::to_string),
        actor_id: "nurse-17".to_string(),
        recorded_at,
    }
}

pub fn usage_claim(
    reference: &str,
    item_code: &str,
    qty: i32,
    unit_id: Option<&str>,
    recorded_at: Option<DateTime<Utc>>,
) -> RecordUsageCommand {
    RecordUsageCommand {
        source_system_id: "HIS-PROD".to_string(),
        external_reference: reference.to_string(),
        encounter_id: "HN881234/EN02".to_string(),
        item_code: item_code.to_string(),
        qty,
        unit_id: unit_id.map(str::to_string),
        actor_id: Some("surgeon-03".to_string()),
        reported_status: None,
        unit_cost: None,
        recorded_at,
        lookback_hours: None,
    }
}

pub fn return_claim(
    reference: &str,
    item_code: &str,
    qty: i32,
    unit_id: Option<&str>,
    recorded_at: Option<DateTime<Utc>>,
) -> RecordReturnCommand {
    RecordReturnCommand {
        source_system_id: "WARD-7".to_string(),
        external_reference: reference.to_string(),
        item_code: item_code.to_string(),
        qty,
        unit_id: unit_id.map(str::to_string),
        actor_id: Some("nurse-17".to_string()),
        reason: ReturnReason::UnwrappedUnused,
        note: None,
        unit_cost: None,
        recorded_at,
        lookback_hours: None,
    }
}
