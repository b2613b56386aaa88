use crate::{
    commands::claims::send_event,
    commands::Command,
    db::DbPool,
    entities::{dispense_unit, return_claim, reversal, usage_claim},
    errors::ServiceError,
    events::{Event, EventSender},
    services::reconciliation::{recompute_window, window_bounds, window_guard},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Longest rebuild span accepted in one request.
const MAX_REBUILD_DAYS: i64 = 366;

/// Recomputes every comparison row in a date range from the ledgers.
/// Comparison rows are projections, so this is always safe to run; it is
/// the recovery path after a bug fix or a restore from backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildWindowsCommand {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Restricts the rebuild to one item when set.
    pub item_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildWindowsResult {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Comparison rows recomputed.
    pub rows: u64,
}

#[async_trait::async_trait]
impl Command for RebuildWindowsCommand {
    type Result = RebuildWindowsResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        if self.from > self.to {
            return Err(ServiceError::ValidationError(format!(
                "rebuild range is inverted: {} > {}",
                self.from, self.to
            )));
        }
        let span_days = (self.to - self.from).num_days() + 1;
        if span_days > MAX_REBUILD_DAYS {
            return Err(ServiceError::ValidationError(format!(
                "rebuild span of {} days exceeds the {} day limit",
                span_days, MAX_REBUILD_DAYS
            )));
        }

        let db = db_pool.as_ref();
        let keys = self.collect_keys(db).await?;

        let mut rows: u64 = 0;
        for (item_code, window) in &keys {
            let _guard = window_guard(item_code, *window).await;
            let item_code = item_code.clone();
            let window = *window;
            db.transaction::<_, (), ServiceError>(move |txn| {
                Box::pin(async move {
                    recompute_window(txn, &item_code, window).await?;
                    Ok(())
                })
            })
            .await
            .map_err(|err| match err {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;
            rows += 1;
        }

        info!(
            from = %self.from,
            to = %self.to,
            rows = rows,
            "comparison windows rebuilt"
        );
        send_event(
            &event_sender,
            Event::WindowsRebuilt {
                from: self.from,
                to: self.to,
                rows,
            },
        )
        .await
        .map_err(|e| {
            error!("rebuild completed but event delivery failed: {}", e);
            e
        })?;

        Ok(RebuildWindowsResult {
            from: self.from,
            to: self.to,
            rows,
        })
    }
}

impl RebuildWindowsCommand {
    /// Every `(item_code, window)` with any activity in the range: an open
    /// or closed unit, a claim of either kind, or a reversal.
    async fn collect_keys(
        &self,
        db: &DatabaseConnection,
    ) -> Result<BTreeSet<(String, NaiveDate)>, ServiceError> {
        let (range_start, _) = window_bounds(self.from);
        let (_, range_end) = window_bounds(self.to);

        let mut keys: BTreeSet<(String, NaiveDate)> = BTreeSet::new();

        let mut unit_query = dispense_unit::Entity::find()
            .select_only()
            .column(dispense_unit::Column::ItemCode)
            .column(dispense_unit::Column::DispensedAt)
            .filter(dispense_unit::Column::DispensedAt.gte(range_start))
            .filter(dispense_unit::Column::DispensedAt.lt(range_end));
        if let Some(item_code) = &self.item_code {
            unit_query = unit_query.filter(dispense_unit::Column::ItemCode.eq(item_code.clone()));
        }
        let unit_rows: Vec<(String, DateTime<Utc>)> = unit_query
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        for (code, dispensed_at) in unit_rows {
            keys.insert((code, dispensed_at.date_naive()));
        }

        let mut usage_query = usage_claim::Entity::find()
            .select_only()
            .column(usage_claim::Column::ItemCode)
            .column(usage_claim::Column::ClaimWindow)
            .distinct()
            .filter(usage_claim::Column::ClaimWindow.gte(self.from))
            .filter(usage_claim::Column::ClaimWindow.lte(self.to));
        if let Some(item_code) = &self.item_code {
            usage_query = usage_query.filter(usage_claim::Column::ItemCode.eq(item_code.clone()));
        }
        let usage_rows: Vec<(String, NaiveDate)> = usage_query
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        keys.extend(usage_rows);

        let mut return_query = return_claim::Entity::find()
            .select_only()
            .column(return_claim::Column::ItemCode)
            .column(return_claim::Column::ClaimWindow)
            .distinct()
            .filter(return_claim::Column::ClaimWindow.gte(self.from))
            .filter(return_claim::Column::ClaimWindow.lte(self.to));
        if let Some(item_code) = &self.item_code {
            return_query =
                return_query.filter(return_claim::Column::ItemCode.eq(item_code.clone()));
        }
        let return_rows: Vec<(String, NaiveDate)> = return_query
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        keys.extend(return_rows);

        let mut reversal_query = reversal::Entity::find()
            .select_only()
            .column(reversal::Column::ItemCode)
            .column(reversal::Column::Window)
            .distinct()
            .filter(reversal::Column::Window.gte(self.from))
            .filter(reversal::Column::Window.lte(self.to));
        if let Some(item_code) = &self.item_code {
            reversal_query = reversal_query.filter(reversal::Column::ItemCode.eq(item_code.clone()));
        }
        let reversal_rows: Vec<(String, NaiveDate)> = reversal_query
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        keys.extend(reversal_rows);

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn rejects_inverted_range() {
        let cmd = RebuildWindowsCommand {
            from: day(2026, 3, 10),
            to: day(2026, 3, 9),
            item_code: None,
        };
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let sender = Arc::new(crate::events::EventSender::new(tx));
        let db = Arc::new(sea_orm::DatabaseConnection::default());
        let err = cmd.execute(db, sender).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn rejects_oversized_span() {
        let cmd = RebuildWindowsCommand {
            from: day(2024, 1, 1),
            to: day(2026, 3, 9),
            item_code: None,
        };
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let sender = Arc::new(crate::events::EventSender::new(tx));
        let db = Arc::new(sea_orm::DatabaseConnection::default());
        let err = cmd.execute(db, sender).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
