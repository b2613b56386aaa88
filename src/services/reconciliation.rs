use crate::{
    commands::admin::rebuild_windows_command::{RebuildWindowsCommand, RebuildWindowsResult},
    commands::claims::record_return_command::RecordReturnCommand,
    commands::claims::record_reversal_command::{RecordReversalCommand, RecordReversalResult},
    commands::claims::record_usage_command::RecordUsageCommand,
    commands::claims::ClaimIngestResult,
    commands::exceptions::resolve_exception_command::{
        ResolveExceptionCommand, ResolveExceptionResult,
    },
    commands::Command,
    db::DbPool,
    entities::{
        claim_exception, comparison_row, dispense_unit, return_claim, reversal, usage_claim,
        ClaimKind, ClaimOutcome, ComparisonStatus, ExceptionReason, ItemStatus,
    },
    errors::ServiceError,
    events::EventSender,
};
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{instrument, warn};
use uuid::Uuid;

lazy_static! {
    static ref WINDOW_LOCKS: DashMap<(String, NaiveDate), Arc<Mutex<()>>> = DashMap::new();
}

/// Serializes recomputation and claim application per `(item_code, window)`.
/// A recompute is a from-scratch fold, so two interleaved ones could
/// otherwise commit partial sums over each other.
pub(crate) async fn window_guard(item_code: &str, window: NaiveDate) -> OwnedMutexGuard<()> {
    let lock = WINDOW_LOCKS
        .entry((item_code.to_string(), window))
        .or_default()
        .value()
        .clone();
    lock.lock_owned().await
}

/// UTC day boundaries for a window, `[start, end)`.
pub fn window_bounds(window: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = window.and_time(NaiveTime::MIN).and_utc();
    let end = (window + Days::new(1)).and_time(NaiveTime::MIN).and_utc();
    (start, end)
}

/// How a claim gets paired with dispense units. Made explicit so the FIFO
/// heuristic is visible in reports instead of buried in branching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStrategy {
    /// The claim names a unit directly, typically an RFID scan.
    ByUnitId(String),
    /// No unit identity on the claim; consume the oldest open units for
    /// the item inside the window (plus configured lookback), oldest first.
    FifoByItemWindow {
        item_code: String,
        window: NaiveDate,
    },
}

impl MatchStrategy {
    pub fn for_claim(unit_id: Option<&str>, item_code: &str, window: NaiveDate) -> Self {
        match unit_id {
            Some(uid) if !uid.trim().is_empty() => MatchStrategy::ByUnitId(uid.trim().to_string()),
            _ => MatchStrategy::FifoByItemWindow {
                item_code: item_code.to_string(),
                window,
            },
        }
    }

    pub fn is_by_unit(&self) -> bool {
        matches!(self, MatchStrategy::ByUnitId(_))
    }
}

/// Classifies one window's totals. Checks run in order; the first match
/// wins, so usage against a window with no dispenses is reported as such
/// even when the quantities happen to balance.
pub fn derive_comparison_status(
    dispensed: i64,
    used: i64,
    returned: i64,
    pending: i64,
) -> ComparisonStatus {
    if dispensed == 0 && (used > 0 || returned > 0) {
        ComparisonStatus::UsedWithoutDispense
    } else if pending == 0 && used + returned == dispensed {
        ComparisonStatus::Matched
    } else if dispensed > 0 && used == 0 {
        ComparisonStatus::DispensedNotUsed
    } else if used > dispensed {
        ComparisonStatus::UsageExceedsDispense
    } else {
        ComparisonStatus::DispenseExceedsUsage
    }
}

/// One window's folded quantities plus activity range.
#[derive(Debug, Clone, Default)]
pub struct WindowTotals {
    pub dispensed: i64,
    pub used: i64,
    pub returned: i64,
    pub pending: i64,
    pub first_dispensed_at: Option<DateTime<Utc>>,
    pub last_dispensed_at: Option<DateTime<Utc>>,
    pub first_used_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(FromQueryResult)]
struct UnitAggRow {
    dispensed: Option<i64>,
    pending: Option<i64>,
    first_at: Option<DateTime<Utc>>,
    last_at: Option<DateTime<Utc>>,
}

#[derive(FromQueryResult)]
struct ClaimAggRow {
    qty: Option<i64>,
    first_at: Option<DateTime<Utc>>,
    last_at: Option<DateTime<Utc>>,
}

#[derive(FromQueryResult)]
struct ReversalAggRow {
    qty: Option<i64>,
}

async fn reversed_qty<C: ConnectionTrait>(
    conn: &C,
    item_code: &str,
    window: NaiveDate,
    kind: ClaimKind,
) -> Result<i64, ServiceError> {
    let row = reversal::Entity::find()
        .select_only()
        .column_as(reversal::Column::Qty.sum(), "qty")
        .filter(reversal::Column::ItemCode.eq(item_code))
        .filter(reversal::Column::Window.eq(window))
        .filter(reversal::Column::ClaimKind.eq(kind))
        .into_model::<ReversalAggRow>()
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(row.and_then(|r| r.qty).unwrap_or(0))
}

/// Folds one `(item_code, window)` bucket from the authoritative tables.
/// Only claims that actually landed (`APPLIED`) count; rejected quantities
/// live in the exception table instead. Reversals subtract from the window
/// totals without touching any unit tallies.
pub async fn fold_window_totals<C: ConnectionTrait>(
    conn: &C,
    item_code: &str,
    window: NaiveDate,
) -> Result<WindowTotals, ServiceError> {
    let (start, end) = window_bounds(window);

    let units = dispense_unit::Entity::find()
        .select_only()
        .column_as(dispense_unit::Column::QtyDispensed.sum(), "dispensed")
        .column_as(dispense_unit::Column::QtyPending.sum(), "pending")
        .column_as(dispense_unit::Column::DispensedAt.min(), "first_at")
        .column_as(dispense_unit::Column::DispensedAt.max(), "last_at")
        .filter(dispense_unit::Column::ItemCode.eq(item_code))
        .filter(dispense_unit::Column::DispensedAt.gte(start))
        .filter(dispense_unit::Column::DispensedAt.lt(end))
        .into_model::<UnitAggRow>()
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let usage = usage_claim::Entity::find()
        .select_only()
        .column_as(usage_claim::Column::Qty.sum(), "qty")
        .column_as(usage_claim::Column::RecordedAt.min(), "first_at")
        .column_as(usage_claim::Column::RecordedAt.max(), "last_at")
        .filter(usage_claim::Column::ItemCode.eq(item_code))
        .filter(usage_claim::Column::ClaimWindow.eq(window))
        .filter(usage_claim::Column::Outcome.eq(ClaimOutcome::Applied))
        .into_model::<ClaimAggRow>()
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let returns = return_claim::Entity::find()
        .select_only()
        .column_as(return_claim::Column::Qty.sum(), "qty")
        .column_as(return_claim::Column::RecordedAt.min(), "first_at")
        .column_as(return_claim::Column::RecordedAt.max(), "last_at")
        .filter(return_claim::Column::ItemCode.eq(item_code))
        .filter(return_claim::Column::ClaimWindow.eq(window))
        .filter(return_claim::Column::Outcome.eq(ClaimOutcome::Applied))
        .into_model::<ClaimAggRow>()
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let usage_reversed = reversed_qty(conn, item_code, window, ClaimKind::Usage).await?;
    let return_reversed = reversed_qty(conn, item_code, window, ClaimKind::Return).await?;

    let raw_used = usage.as_ref().and_then(|r| r.qty).unwrap_or(0);
    let raw_returned = returns.as_ref().and_then(|r| r.qty).unwrap_or(0);

    let used = raw_used - usage_reversed;
    let returned = raw_returned - return_reversed;
    if used < 0 || returned < 0 {
        warn!(
            item_code = %item_code,
            window = %window,
            used,
            returned,
            "reversals exceed recorded claims for window, clamping totals to zero"
        );
    }

    Ok(WindowTotals {
        dispensed: units.as_ref().and_then(|r| r.dispensed).unwrap_or(0),
        used: used.max(0),
        returned: returned.max(0),
        pending: units.as_ref().and_then(|r| r.pending).unwrap_or(0),
        first_dispensed_at: units.as_ref().and_then(|r| r.first_at),
        last_dispensed_at: units.as_ref().and_then(|r| r.last_at),
        first_used_at: usage.as_ref().and_then(|r| r.first_at),
        last_used_at: usage.as_ref().and_then(|r| r.last_at),
    })
}

/// Recomputes and upserts the comparison row for one `(item_code, window)`.
/// Callers must hold the window guard for the key.
pub async fn recompute_window<C: ConnectionTrait>(
    conn: &C,
    item_code: &str,
    window: NaiveDate,
) -> Result<comparison_row::Model, ServiceError> {
    let started = std::time::Instant::now();

    let totals = fold_window_totals(conn, item_code, window).await?;
    let status =
        derive_comparison_status(totals.dispensed, totals.used, totals.returned, totals.pending);

    let existing = comparison_row::Entity::find()
        .filter(comparison_row::Column::ItemCode.eq(item_code))
        .filter(comparison_row::Column::Window.eq(window))
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let model = match existing {
        Some(row) => {
            let next_version = row.version + 1;
            let mut active: comparison_row::ActiveModel = row.into();
            active.total_dispensed = Set(totals.dispensed);
            active.total_used = Set(totals.used);
            active.total_returned = Set(totals.returned);
            active.difference = Set(totals.dispensed - totals.used);
            active.total_pending = Set(totals.pending);
            active.status = Set(status);
            active.first_dispensed_at = Set(totals.first_dispensed_at);
            active.last_dispensed_at = Set(totals.last_dispensed_at);
            active.first_used_at = Set(totals.first_used_at);
            active.last_used_at = Set(totals.last_used_at);
            active.computed_at = Set(Utc::now());
            active.version = Set(next_version);
            active
                .update(conn)
                .await
                .map_err(ServiceError::DatabaseError)?
        }
        None => {
            let active = comparison_row::ActiveModel {
                id: Set(Uuid::new_v4()),
                item_code: Set(item_code.to_string()),
                window: Set(window),
                total_dispensed: Set(totals.dispensed),
                total_used: Set(totals.used),
                total_returned: Set(totals.returned),
                difference: Set(totals.dispensed - totals.used),
                total_pending: Set(totals.pending),
                status: Set(status),
                first_dispensed_at: Set(totals.first_dispensed_at),
                last_dispensed_at: Set(totals.last_dispensed_at),
                first_used_at: Set(totals.first_used_at),
                last_used_at: Set(totals.last_used_at),
                computed_at: Set(Utc::now()),
                version: Set(1),
            };
            active
                .insert(conn)
                .await
                .map_err(ServiceError::DatabaseError)?
        }
    };

    crate::metrics::BUSINESS_METRICS.record_recompute(started.elapsed());

    Ok(model)
}

/// One successful tally mutation against a unit.
#[derive(Debug, Clone)]
pub(crate) struct TallyUpdate {
    pub unit: dispense_unit::Model,
    pub old_status: ItemStatus,
    pub new_status: ItemStatus,
    pub applied_qty: i32,
}

/// Moves `qty` out of a unit's pending tally into used or returned,
/// guarded by the unit's version so a concurrent mutation loses cleanly
/// instead of silently overwriting. Fails with `OverClaim` when the unit
/// cannot absorb the full quantity.
pub(crate) async fn apply_claim_to_unit<C: ConnectionTrait>(
    conn: &C,
    unit: &dispense_unit::Model,
    qty: i32,
    kind: ClaimKind,
    reported_status: Option<&str>,
) -> Result<TallyUpdate, ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::InvalidInput(
            "claim quantity must be positive".into(),
        ));
    }
    if qty > unit.qty_pending {
        return Err(ServiceError::OverClaim(format!(
            "unit {} has {} pending, claim wants {}",
            unit.unit_id, unit.qty_pending, qty
        )));
    }

    let (new_used, new_returned) = match kind {
        ClaimKind::Usage => (unit.qty_used + qty, unit.qty_returned),
        ClaimKind::Return => (unit.qty_used, unit.qty_returned + qty),
    };
    let new_pending = unit.qty_pending - qty;

    let mut updated = unit.clone();
    updated.qty_used = new_used;
    updated.qty_returned = new_returned;
    updated.qty_pending = new_pending;
    let new_status = updated.derived_status();
    if new_status.rank() < unit.status.rank() {
        return Err(ServiceError::InternalError(format!(
            "unit {} status would regress from {} to {}",
            unit.unit_id, unit.status, new_status
        )));
    }

    let now = Utc::now();
    let mut update = dispense_unit::Entity::update_many()
        .col_expr(dispense_unit::Column::QtyUsed, Expr::value(new_used))
        .col_expr(dispense_unit::Column::QtyReturned, Expr::value(new_returned))
        .col_expr(dispense_unit::Column::QtyPending, Expr::value(new_pending))
        .col_expr(dispense_unit::Column::Status, Expr::value(new_status))
        .col_expr(dispense_unit::Column::Version, Expr::value(unit.version + 1))
        .col_expr(dispense_unit::Column::UpdatedAt, Expr::value(now));
    if let Some(reported) = reported_status {
        update = update.col_expr(
            dispense_unit::Column::ReportedStatus,
            Expr::value(reported),
        );
    }

    let result = update
        .filter(dispense_unit::Column::Id.eq(unit.id))
        .filter(dispense_unit::Column::Version.eq(unit.version))
        .exec(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(unit.id));
    }

    updated.status = new_status;
    updated.version = unit.version + 1;
    updated.updated_at = now;
    if let Some(reported) = reported_status {
        updated.reported_status = Some(reported.to_string());
    }

    Ok(TallyUpdate {
        unit: updated,
        old_status: unit.status,
        new_status,
        applied_qty: qty,
    })
}

/// Open units eligible for FIFO matching, oldest dispense first. The range
/// is the claim's own day, stretched backwards by the configured lookback.
pub(crate) async fn open_units_oldest_first<C: ConnectionTrait>(
    conn: &C,
    item_code: &str,
    window: NaiveDate,
    lookback_hours: Option<u64>,
) -> Result<Vec<dispense_unit::Model>, ServiceError> {
    let (window_start, window_end) = window_bounds(window);
    let lower = match lookback_hours {
        Some(hours) => window_start - Duration::hours(hours as i64),
        None => window_start,
    };

    dispense_unit::Entity::find()
        .filter(dispense_unit::Column::ItemCode.eq(item_code))
        .filter(dispense_unit::Column::QtyPending.gt(0))
        .filter(dispense_unit::Column::DispensedAt.gte(lower))
        .filter(dispense_unit::Column::DispensedAt.lt(window_end))
        .order_by_asc(dispense_unit::Column::DispensedAt)
        .all(conn)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// What claim matching decided before the claim row is written. At most one
/// of `rejection` and a non-empty `applied` is set; shortfalls can accompany
/// either an empty or a partial application.
#[derive(Debug, Default)]
pub(crate) struct MatchOutcome {
    pub applied: Vec<TallyUpdate>,
    /// Quantities that found no unit, with a detail line each.
    pub shortfalls: Vec<(i32, String)>,
    /// Set when the whole claim must be refused instead of applied.
    pub rejection: Option<String>,
}

impl MatchOutcome {
    pub fn outcome(&self) -> ClaimOutcome {
        if self.rejection.is_some() {
            ClaimOutcome::Rejected
        } else {
            ClaimOutcome::Applied
        }
    }
}

/// Pairs a claim with dispense units per the strategy. Unit-addressed claims
/// are whole-or-refused; FIFO claims apply whatever fits and report the rest
/// as a shortfall. A claim that matches nothing still counts toward window
/// totals, the shortfall exception is its paper trail.
pub(crate) async fn match_claim_to_units<C: ConnectionTrait>(
    conn: &C,
    strategy: &MatchStrategy,
    item_code: &str,
    qty: i32,
    kind: ClaimKind,
    reported_status: Option<&str>,
    lookback_hours: Option<u64>,
) -> Result<MatchOutcome, ServiceError> {
    let mut outcome = MatchOutcome::default();

    match strategy {
        MatchStrategy::ByUnitId(uid) => {
            let unit = dispense_unit::Entity::find()
                .filter(dispense_unit::Column::UnitId.eq(uid.clone()))
                .one(conn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            match unit {
                None => {
                    outcome
                        .shortfalls
                        .push((qty, format!("unit {} not found", uid)));
                }
                Some(u) if u.item_code != item_code => {
                    outcome.shortfalls.push((
                        qty,
                        format!(
                            "unit {} holds item {}, claim names {}",
                            uid, u.item_code, item_code
                        ),
                    ));
                }
                Some(u) => {
                    if qty > u.qty_pending {
                        outcome.rejection = Some(format!(
                            "unit {} has {} pending, claim wants {}",
                            uid, u.qty_pending, qty
                        ));
                    } else {
                        outcome
                            .applied
                            .push(apply_claim_to_unit(conn, &u, qty, kind, reported_status).await?);
                    }
                }
            }
        }
        MatchStrategy::FifoByItemWindow { item_code, window } => {
            let units = open_units_oldest_first(conn, item_code, *window, lookback_hours).await?;
            let mut remaining = qty;
            for u in units {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(u.qty_pending);
                outcome
                    .applied
                    .push(apply_claim_to_unit(conn, &u, take, kind, reported_status).await?);
                remaining -= take;
            }
            if remaining > 0 {
                outcome.shortfalls.push((
                    remaining,
                    format!(
                        "no open unit could absorb {} of {} in window {}",
                        remaining, item_code, window
                    ),
                ));
            }
        }
    }

    Ok(outcome)
}

/// Records a refused or unmatched quantity where staff can find it.
pub(crate) async fn file_exception<C: ConnectionTrait>(
    conn: &C,
    claim_id: Uuid,
    claim_kind: ClaimKind,
    reason: ExceptionReason,
    item_code: &str,
    qty: i32,
    detail: String,
) -> Result<claim_exception::Model, ServiceError> {
    let active = claim_exception::ActiveModel {
        id: Set(Uuid::new_v4()),
        claim_id: Set(claim_id),
        claim_kind: Set(claim_kind),
        reason: Set(reason),
        item_code: Set(item_code.to_string()),
        qty: Set(qty),
        detail: Set(detail),
        resolved: Set(false),
        ..Default::default()
    };
    active
        .insert(conn)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Service fronting claim ingestion, reversals and window maintenance.
#[derive(Clone)]
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    lookback_hours: Option<u64>,
}

impl ReconciliationService {
    /// Creates a new reconciliation service instance
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        lookback_hours: Option<u64>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            lookback_hours,
        }
    }

    /// Ingests one usage claim from the clinical system.
    #[instrument(skip(self, command), fields(item_code = %command.item_code))]
    pub async fn record_usage(
        &self,
        mut command: RecordUsageCommand,
    ) -> Result<ClaimIngestResult, ServiceError> {
        command.lookback_hours = self.lookback_hours;
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    /// Ingests one return confirmation.
    #[instrument(skip(self, command), fields(item_code = %command.item_code))]
    pub async fn record_return(
        &self,
        mut command: RecordReturnCommand,
    ) -> Result<ClaimIngestResult, ServiceError> {
        command.lookback_hours = self.lookback_hours;
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    /// Files an administrative reversal against a window.
    #[instrument(skip(self, command), fields(item_code = %command.item_code))]
    pub async fn record_reversal(
        &self,
        command: RecordReversalCommand,
    ) -> Result<RecordReversalResult, ServiceError> {
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    /// Marks an exception investigated.
    #[instrument(skip(self, command), fields(exception_id = %command.exception_id))]
    pub async fn resolve_exception(
        &self,
        command: ResolveExceptionCommand,
    ) -> Result<ResolveExceptionResult, ServiceError> {
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    /// Recomputes every comparison row in a date range from scratch.
    #[instrument(skip(self, command))]
    pub async fn rebuild_windows(
        &self,
        command: RebuildWindowsCommand,
    ) -> Result<RebuildWindowsResult, ServiceError> {
        command
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }
}
