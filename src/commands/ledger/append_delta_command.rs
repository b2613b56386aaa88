use crate::{
    commands::Command,
    db::DbPool,
    entities::{comparison_row, dispense_unit, item_master, slot_delta, ItemStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::ledger::DeltaSign,
    services::reconciliation::{recompute_window, window_guard},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, FromQueryResult, QueryFilter, QuerySelect, Set,
    SqlErr, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// One cabinet event straight off the wire. A take of a tracked item also
/// opens a dispense unit inside the same transaction, so the ledger row and
/// the unit can never disagree.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppendDeltaCommand {
    #[validate(length(min = 1, message = "cabinet_id cannot be empty"))]
    pub cabinet_id: String,

    #[validate(range(min = 0, message = "slot_no cannot be negative"))]
    pub slot_no: i32,

    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,

    /// "take" or "refill"; the bare signs "-" and "+" are accepted too.
    #[validate(length(min = 1, message = "sign cannot be empty"))]
    pub sign: String,

    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,

    /// RFID tag scanned at the door, when the cabinet has a reader.
    pub unit_id: Option<String>,

    #[validate(length(min = 1, message = "actor_id cannot be empty"))]
    pub actor_id: String,

    /// Event time from the cabinet; defaults to ingest time when absent.
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendDeltaResult {
    pub delta: slot_delta::Model,
    /// Present when the take spawned a tracked dispense unit.
    pub unit: Option<dispense_unit::Model>,
    /// Refreshed in the same transaction whenever a unit was opened.
    pub comparison: Option<comparison_row::Model>,
    pub on_hand_after: i64,
}

#[derive(FromQueryResult)]
struct OnHandRow {
    on_hand: Option<i64>,
}

#[async_trait::async_trait]
impl Command for AppendDeltaCommand {
    type Result = AppendDeltaResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        match self.try_append(db_pool).await {
            Ok(outcome) => {
                self.log_and_trigger_events(&event_sender, &outcome).await?;
                Ok(outcome)
            }
            Err(err) => {
                if matches!(err, ServiceError::InvalidDelta(_)) {
                    self.emit_rejection(&event_sender, &err).await;
                }
                Err(err)
            }
        }
    }
}

impl AppendDeltaCommand {
    /// Identifier for a tracked unit when the cabinet has no RFID reader.
    fn synthetic_unit_id(&self, recorded_at: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}:{}",
            self.item_code,
            self.cabinet_id,
            self.slot_no,
            recorded_at.timestamp_millis()
        )
    }

    async fn try_append(&self, db_pool: Arc<DbPool>) -> Result<AppendDeltaResult, ServiceError> {
        self.validate().map_err(|e| {
            let msg = format!("invalid delta payload: {}", e);
            error!("{}", msg);
            ServiceError::InvalidDelta(msg)
        })?;

        let sign = DeltaSign::parse(&self.sign).ok_or_else(|| {
            ServiceError::InvalidDelta(format!(
                "unrecognized sign {:?}, expected take or refill",
                self.sign
            ))
        })?;

        let recorded_at = self.recorded_at.unwrap_or_else(Utc::now);
        let window = recorded_at.date_naive();
        let delta_qty = match sign {
            DeltaSign::Take => -self.qty,
            DeltaSign::Refill => self.qty,
        };

        // Takes may open a unit and therefore touch the window's comparison
        // row; refills never do.
        let _window_guard = match sign {
            DeltaSign::Take => Some(window_guard(&self.item_code, window).await),
            DeltaSign::Refill => None,
        };

        let cabinet_id = self.cabinet_id.clone();
        let slot_no = self.slot_no;
        let item_code = self.item_code.clone();
        let actor_id = self.actor_id.clone();
        let qty = self.qty;
        let rfid = self
            .unit_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let synthetic_id = self.synthetic_unit_id(recorded_at);

        let db = db_pool.as_ref();
        db.transaction::<_, AppendDeltaResult, ServiceError>(move |txn| {
            Box::pin(async move {
                let item = item_master::Entity::find_by_id(item_code.clone())
                    .one(txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?
                    .ok_or_else(|| {
                        ServiceError::InvalidDelta(format!("unknown item code {}", item_code))
                    })?;

                let on_hand_row = slot_delta::Entity::find()
                    .select_only()
                    .column_as(slot_delta::Column::DeltaQty.sum(), "on_hand")
                    .filter(slot_delta::Column::CabinetId.eq(cabinet_id.clone()))
                    .filter(slot_delta::Column::SlotNo.eq(slot_no))
                    .into_model::<OnHandRow>()
                    .one(txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
                let on_hand = on_hand_row.and_then(|r| r.on_hand).unwrap_or(0);

                if delta_qty < 0 && i64::from(qty) > on_hand {
                    return Err(ServiceError::InvalidDelta(format!(
                        "take of {} exceeds on-hand {} for cabinet {} slot {}",
                        qty, on_hand, cabinet_id, slot_no
                    )));
                }

                let unit = if delta_qty < 0 && item.is_tracked {
                    let unit_external = rfid.unwrap_or(synthetic_id);
                    let active = dispense_unit::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        unit_id: Set(unit_external.clone()),
                        item_code: Set(item_code.clone()),
                        cabinet_id: Set(cabinet_id.clone()),
                        slot_no: Set(slot_no),
                        actor_id: Set(actor_id.clone()),
                        qty_dispensed: Set(qty),
                        qty_used: Set(0),
                        qty_returned: Set(0),
                        qty_pending: Set(qty),
                        status: Set(ItemStatus::Pending),
                        reported_status: Set(None),
                        dispensed_at: Set(recorded_at),
                        version: Set(1),
                        ..Default::default()
                    };
                    let inserted = active.insert(txn).await.map_err(|e| {
                        if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                            ServiceError::Conflict(format!(
                                "unit id {} already exists",
                                unit_external
                            ))
                        } else {
                            ServiceError::DatabaseError(e)
                        }
                    })?;
                    Some(inserted)
                } else {
                    None
                };

                let delta = slot_delta::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cabinet_id: Set(cabinet_id),
                    slot_no: Set(slot_no),
                    item_code: Set(item_code.clone()),
                    delta_qty: Set(delta_qty),
                    actor_id: Set(actor_id),
                    dispense_unit_id: Set(unit.as_ref().map(|u| u.unit_id.clone())),
                    recorded_at: Set(recorded_at),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::DatabaseError)?;

                let comparison = if unit.is_some() {
                    Some(recompute_window(txn, &item_code, window).await?)
                } else {
                    None
                };

                Ok(AppendDeltaResult {
                    delta,
                    unit,
                    comparison,
                    on_hand_after: on_hand + i64::from(delta_qty),
                })
            })
        })
        .await
        .map_err(|err| match err {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }

    async fn log_and_trigger_events(
        &self,
        event_sender: &EventSender,
        outcome: &AppendDeltaResult,
    ) -> Result<(), ServiceError> {
        info!(
            cabinet_id = %outcome.delta.cabinet_id,
            slot_no = outcome.delta.slot_no,
            item_code = %outcome.delta.item_code,
            delta_qty = outcome.delta.delta_qty,
            on_hand_after = outcome.on_hand_after,
            "slot delta recorded"
        );

        event_sender
            .send(Event::DeltaAppended {
                delta_id: outcome.delta.id,
                cabinet_id: outcome.delta.cabinet_id.clone(),
                slot_no: outcome.delta.slot_no,
                item_code: outcome.delta.item_code.clone(),
                delta_qty: outcome.delta.delta_qty,
            })
            .await
            .map_err(|e| {
                let msg = format!("failed to send delta event: {}", e);
                error!("{}", msg);
                ServiceError::EventError(msg)
            })?;

        if let Some(unit) = &outcome.unit {
            event_sender
                .send(Event::UnitDispensed {
                    unit_id: unit.unit_id.clone(),
                    item_code: unit.item_code.clone(),
                    qty: unit.qty_dispensed,
                })
                .await
                .map_err(|e| {
                    let msg = format!("failed to send unit event: {}", e);
                    error!("{}", msg);
                    ServiceError::EventError(msg)
                })?;
        }

        if let Some(comparison) = &outcome.comparison {
            event_sender
                .send(Event::ComparisonRecomputed {
                    item_code: comparison.item_code.clone(),
                    window: comparison.window,
                    status: comparison.status,
                })
                .await
                .map_err(|e| {
                    let msg = format!("failed to send comparison event: {}", e);
                    error!("{}", msg);
                    ServiceError::EventError(msg)
                })?;
        }

        Ok(())
    }

    async fn emit_rejection(&self, event_sender: &EventSender, err: &ServiceError) {
        // Rejection telemetry must not mask the caller's error.
        let _ = event_sender
            .send(Event::DeltaRejected {
                cabinet_id: self.cabinet_id.clone(),
                slot_no: self.slot_no,
                item_code: self.item_code.clone(),
                reason: err.to_string(),
            })
            .await;
    }
}
