use crate::{
    commands::claims::send_event,
    commands::Command,
    db::DbPool,
    entities::{comparison_row, reversal, ClaimKind},
    errors::ServiceError,
    events::{Event, EventSender},
    services::reconciliation::{recompute_window, window_guard},
};
use chrono::NaiveDate;
use sea_orm::{Set, *};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// An administrative correction against a window (billing fix, mis-scan).
/// Unit tallies are never rewound; the reversal subtracts from the window's
/// totals when the comparison row is next folded.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordReversalCommand {
    /// Which side of the ledger to subtract from.
    pub claim_kind: ClaimKind,

    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,

    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,

    /// The calendar day whose totals the correction targets.
    pub window: NaiveDate,

    #[validate(length(min = 1, message = "reason cannot be empty"))]
    pub reason: String,

    #[validate(length(min = 1, message = "filed_by cannot be empty"))]
    pub filed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordReversalResult {
    pub reversal: reversal::Model,
    pub comparison: comparison_row::Model,
}

#[async_trait::async_trait]
impl Command for RecordReversalCommand {
    type Result = RecordReversalResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            let msg = format!("invalid reversal: {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let db = db_pool.as_ref();
        let _guard = window_guard(&self.item_code, self.window).await;

        let claim_kind = self.claim_kind;
        let item_code = self.item_code.clone();
        let qty = self.qty;
        let window = self.window;
        let reason = self.reason.clone();
        let filed_by = self.filed_by.clone();

        let result = db
            .transaction::<_, RecordReversalResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let filed = reversal::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        claim_kind: Set(claim_kind),
                        item_code: Set(item_code.clone()),
                        qty: Set(qty),
                        window: Set(window),
                        reason: Set(reason),
                        filed_by: Set(filed_by),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;

                    let comparison = recompute_window(txn, &item_code, window).await?;

                    Ok(RecordReversalResult {
                        reversal: filed,
                        comparison,
                    })
                })
            })
            .await
            .map_err(|err| match err {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            reversal_id = %result.reversal.id,
            kind = %result.reversal.claim_kind,
            item_code = %result.reversal.item_code,
            qty = result.reversal.qty,
            window = %result.reversal.window,
            "reversal filed"
        );
        send_event(
            &event_sender,
            Event::ReversalFiled {
                reversal_id: result.reversal.id,
                kind: result.reversal.claim_kind,
                item_code: result.reversal.item_code.clone(),
                window: result.reversal.window,
                qty: result.reversal.qty,
            },
        )
        .await?;
        send_event(
            &event_sender,
            Event::ComparisonRecomputed {
                item_code: result.comparison.item_code.clone(),
                window: result.comparison.window,
                status: result.comparison.status,
            },
        )
        .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> RecordReversalCommand {
        RecordReversalCommand {
            claim_kind: ClaimKind::Usage,
            item_code: "SYR-10ML".to_string(),
            qty: 1,
            window: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            reason: "billing correction".to_string(),
            filed_by: "pharmacist-3".to_string(),
        }
    }

    #[test]
    fn validates_well_formed_reversal() {
        assert!(command().validate().is_ok());
    }

    #[test]
    fn rejects_blank_reason() {
        let mut cmd = command();
        cmd.reason = String::new();
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn rejects_zero_quantity() {
        let mut cmd = command();
        cmd.qty = 0;
        assert!(cmd.validate().is_err());
    }
}
