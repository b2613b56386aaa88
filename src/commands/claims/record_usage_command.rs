use crate::{
    commands::claims::{send_event, ClaimIngestResult, MAX_TALLY_RETRIES},
    commands::Command,
    db::DbPool,
    entities::{
        comparison_row, usage_claim, ClaimKind, ClaimOutcome, ExceptionReason, ItemStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::reconciliation::{
        file_exception, match_claim_to_units, recompute_window, window_guard, MatchStrategy,
        TallyUpdate,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{Set, *};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// A billed-usage report from the hospital information system.
/// `(source_system_id, external_reference)` makes ingestion idempotent;
/// replaying the same claim answers from history instead of re-matching.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordUsageCommand {
    #[validate(length(min = 1, message = "source_system_id cannot be empty"))]
    pub source_system_id: String,

    #[validate(length(min = 1, message = "external_reference cannot be empty"))]
    pub external_reference: String,

    /// HN/EN visit pair from the clinical system.
    #[validate(length(min = 1, message = "encounter_id cannot be empty"))]
    pub encounter_id: String,

    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,

    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,

    /// Targets a unit directly; blank or absent means FIFO matching.
    pub unit_id: Option<String>,

    pub actor_id: Option<String>,

    /// HIS item status string, checked against the known set before
    /// anything is persisted.
    pub reported_status: Option<String>,

    /// Monetary passthrough, never computed on.
    pub unit_cost: Option<Decimal>,

    /// Clinical event time; defaults to ingest time when absent.
    pub recorded_at: Option<DateTime<Utc>>,

    /// Injected from configuration by the service, never from the wire.
    #[serde(skip)]
    pub lookback_hours: Option<u64>,
}

struct ProcessedClaim {
    claim: usage_claim::Model,
    applied: Vec<TallyUpdate>,
    exceptions: Vec<crate::entities::claim_exception::Model>,
    comparison: comparison_row::Model,
    rejection_reason: Option<String>,
}

#[async_trait::async_trait]
impl Command for RecordUsageCommand {
    type Result = ClaimIngestResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            let msg = format!("invalid usage claim: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        if let Some(raw) = self.normalized_reported_status() {
            if ItemStatus::parse_reported(&raw).is_none() {
                return Err(ServiceError::UnknownStatus(format!(
                    "unrecognized reported status {:?}",
                    raw
                )));
            }
        }

        let db = db_pool.as_ref();
        let recorded_at = self.recorded_at.unwrap_or_else(Utc::now);
        let window = recorded_at.date_naive();

        let _guard = window_guard(&self.item_code, window).await;

        if let Some(existing) = self.find_existing(db).await? {
            return self.replay_existing(db, &event_sender, existing).await;
        }

        let mut attempts = 0;
        let processed = loop {
            attempts += 1;
            match self.process(db, recorded_at, window).await {
                Err(ServiceError::ConcurrentModification(unit)) if attempts < MAX_TALLY_RETRIES => {
                    warn!(
                        attempt = attempts,
                        unit = %unit,
                        "tally version conflict, retrying usage claim"
                    );
                }
                Err(ServiceError::DuplicateClaim(_)) => {
                    // Lost a race against an identical claim; answer from
                    // the row the winner wrote.
                    let existing = self.find_existing(db).await?.ok_or_else(|| {
                        ServiceError::InternalError(
                            "duplicate usage claim vanished during replay".to_string(),
                        )
                    })?;
                    return self.replay_existing(db, &event_sender, existing).await;
                }
                other => break other?,
            }
        };

        self.log_and_trigger_events(&event_sender, &processed)
            .await?;

        Ok(ClaimIngestResult {
            claim_id: processed.claim.id,
            outcome: processed.claim.outcome,
            item_code: processed.claim.item_code.clone(),
            qty: processed.claim.qty,
            claim_window: processed.claim.claim_window,
            applied_unit_ids: processed
                .applied
                .iter()
                .map(|t| t.unit.unit_id.clone())
                .collect(),
            exception_ids: processed.exceptions.iter().map(|e| e.id).collect(),
            comparison: Some(processed.comparison),
        })
    }
}

impl RecordUsageCommand {
    fn normalized_unit_id(&self) -> Option<String> {
        self.unit_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn normalized_reported_status(&self) -> Option<String> {
        self.reported_status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Field-level equality against a stored claim; a replay with any of
    /// these changed gets a duplicate exception on top of the replay answer.
    fn matches_payload(&self, existing: &usage_claim::Model) -> bool {
        existing.item_code == self.item_code
            && existing.qty == self.qty
            && existing.encounter_id == self.encounter_id
            && existing.unit_id == self.normalized_unit_id()
    }

    async fn find_existing(
        &self,
        db: &DatabaseConnection,
    ) -> Result<Option<usage_claim::Model>, ServiceError> {
        usage_claim::Entity::find()
            .filter(usage_claim::Column::SourceSystemId.eq(self.source_system_id.clone()))
            .filter(usage_claim::Column::ExternalReference.eq(self.external_reference.clone()))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn replay_existing(
        &self,
        db: &DatabaseConnection,
        event_sender: &EventSender,
        existing: usage_claim::Model,
    ) -> Result<ClaimIngestResult, ServiceError> {
        let mut exception_ids = Vec::new();
        if !self.matches_payload(&existing) {
            let exception = file_exception(
                db,
                existing.id,
                ClaimKind::Usage,
                ExceptionReason::DuplicateClaim,
                &existing.item_code,
                self.qty,
                format!(
                    "replay of {}/{} does not match the stored claim",
                    self.source_system_id, self.external_reference
                ),
            )
            .await?;
            send_event(
                event_sender,
                Event::ExceptionFiled {
                    exception_id: exception.id,
                    reason: exception.reason,
                    item_code: exception.item_code.clone(),
                    qty: exception.qty,
                },
            )
            .await?;
            exception_ids.push(exception.id);
        }

        let comparison = comparison_row::Entity::find()
            .filter(comparison_row::Column::ItemCode.eq(existing.item_code.clone()))
            .filter(comparison_row::Column::Window.eq(existing.claim_window))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(
            claim_id = %existing.id,
            source_system_id = %existing.source_system_id,
            external_reference = %existing.external_reference,
            "usage claim replay answered from history"
        );
        send_event(
            event_sender,
            Event::ClaimDuplicate {
                claim_id: existing.id,
                kind: ClaimKind::Usage,
            },
        )
        .await?;

        Ok(ClaimIngestResult {
            claim_id: existing.id,
            outcome: ClaimOutcome::Duplicate,
            item_code: existing.item_code,
            qty: existing.qty,
            claim_window: existing.claim_window,
            applied_unit_ids: Vec::new(),
            exception_ids,
            comparison,
        })
    }

    async fn process(
        &self,
        db: &DatabaseConnection,
        recorded_at: DateTime<Utc>,
        window: NaiveDate,
    ) -> Result<ProcessedClaim, ServiceError> {
        let source_system_id = self.source_system_id.clone();
        let external_reference = self.external_reference.clone();
        let encounter_id = self.encounter_id.clone();
        let item_code = self.item_code.clone();
        let qty = self.qty;
        let unit_id = self.normalized_unit_id();
        let actor_id = self.actor_id.clone();
        let reported_status = self.normalized_reported_status();
        let unit_cost = self.unit_cost;
        let lookback_hours = self.lookback_hours;

        db.transaction::<_, ProcessedClaim, ServiceError>(move |txn| {
            Box::pin(async move {
                let strategy = MatchStrategy::for_claim(unit_id.as_deref(), &item_code, window);
                let matched = match_claim_to_units(
                    txn,
                    &strategy,
                    &item_code,
                    qty,
                    ClaimKind::Usage,
                    reported_status.as_deref(),
                    lookback_hours,
                )
                .await?;

                let claim = usage_claim::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    source_system_id: Set(source_system_id.clone()),
                    external_reference: Set(external_reference.clone()),
                    encounter_id: Set(encounter_id),
                    item_code: Set(item_code.clone()),
                    qty: Set(qty),
                    unit_id: Set(unit_id),
                    actor_id: Set(actor_id),
                    reported_status: Set(reported_status),
                    unit_cost: Set(unit_cost),
                    recorded_at: Set(recorded_at),
                    claim_window: Set(window),
                    outcome: Set(matched.outcome()),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(|e| {
                    if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                        ServiceError::DuplicateClaim(format!(
                            "claim {}/{} already recorded",
                            source_system_id, external_reference
                        ))
                    } else {
                        ServiceError::DatabaseError(e)
                    }
                })?;

                let mut exceptions = Vec::new();
                if let Some(detail) = matched.rejection.clone() {
                    exceptions.push(
                        file_exception(
                            txn,
                            claim.id,
                            ClaimKind::Usage,
                            ExceptionReason::OverClaim,
                            &item_code,
                            qty,
                            detail,
                        )
                        .await?,
                    );
                }
                for (short_qty, detail) in &matched.shortfalls {
                    exceptions.push(
                        file_exception(
                            txn,
                            claim.id,
                            ClaimKind::Usage,
                            ExceptionReason::UnmatchedClaim,
                            &item_code,
                            *short_qty,
                            detail.clone(),
                        )
                        .await?,
                    );
                }

                let comparison = recompute_window(txn, &item_code, window).await?;

                Ok(ProcessedClaim {
                    claim,
                    applied: matched.applied,
                    exceptions,
                    comparison,
                    rejection_reason: matched.rejection,
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
        processed: &ProcessedClaim,
    ) -> Result<(), ServiceError> {
        let claim = &processed.claim;
        match claim.outcome {
            ClaimOutcome::Applied => {
                info!(
                    claim_id = %claim.id,
                    item_code = %claim.item_code,
                    qty = claim.qty,
                    units = processed.applied.len(),
                    "usage claim applied"
                );
                send_event(
                    event_sender,
                    Event::UsageApplied {
                        claim_id: claim.id,
                        item_code: claim.item_code.clone(),
                        qty: claim.qty,
                        unit_ids: processed
                            .applied
                            .iter()
                            .map(|t| t.unit.unit_id.clone())
                            .collect(),
                    },
                )
                .await?;
            }
            ClaimOutcome::Rejected => {
                send_event(
                    event_sender,
                    Event::ClaimRejected {
                        claim_id: claim.id,
                        kind: ClaimKind::Usage,
                        item_code: claim.item_code.clone(),
                        reason: processed
                            .rejection_reason
                            .clone()
                            .unwrap_or_else(|| "over claim".to_string()),
                    },
                )
                .await?;
            }
            ClaimOutcome::Duplicate => {}
        }

        for update in &processed.applied {
            if update.old_status != update.new_status {
                send_event(
                    event_sender,
                    Event::UnitStatusChanged {
                        unit_id: update.unit.unit_id.clone(),
                        old_status: update.old_status,
                        new_status: update.new_status,
                    },
                )
                .await?;
            }
        }

        for exception in &processed.exceptions {
            send_event(
                event_sender,
                Event::ExceptionFiled {
                    exception_id: exception.id,
                    reason: exception.reason,
                    item_code: exception.item_code.clone(),
                    qty: exception.qty,
                },
            )
            .await?;
        }

        send_event(
            event_sender,
            Event::ComparisonRecomputed {
                item_code: processed.comparison.item_code.clone(),
                window: processed.comparison.window,
                status: processed.comparison.status,
            },
        )
        .await
    }
}
