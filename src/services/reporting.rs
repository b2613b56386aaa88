use crate::{
    db::DbPool,
    entities::{
        claim_exception, comparison_row, dispense_unit, item_master, return_claim, usage_claim,
        ClaimKind, ComparisonStatus, ExceptionReason, ItemStatus,
    },
    errors::ServiceError,
    services::reconciliation::window_bounds,
};
use chrono::NaiveDate;
use sea_orm::{
    ColumnTrait, EntityTrait, FromQueryResult, JoinType, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait, Select,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// Filters shared by the comparison listing and the summary roll-up.
/// Department and item type live on the catalog, so either one pulls in
/// a join against `item_master`.
#[derive(Debug, Clone, Default)]
pub struct ComparisonFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub item_code: Option<String>,
    pub status: Option<ComparisonStatus>,
    pub department_code: Option<String>,
    pub item_type: Option<String>,
}

impl ComparisonFilter {
    fn needs_catalog_join(&self) -> bool {
        self.department_code.is_some() || self.item_type.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    pub item_code: Option<String>,
    pub cabinet_id: Option<String>,
    pub status: Option<ItemStatus>,
    pub open_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExceptionFilter {
    pub resolved: Option<bool>,
    pub reason: Option<ExceptionReason>,
    pub claim_kind: Option<ClaimKind>,
    pub item_code: Option<String>,
}

/// Drill-down for one `(item_code, window)`: the stored row plus every
/// record that contributed to it.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonDetail {
    pub row: comparison_row::Model,
    pub units: Vec<dispense_unit::Model>,
    pub usage_claims: Vec<usage_claim::Model>,
    pub return_claims: Vec<return_claim::Model>,
    pub exceptions: Vec<claim_exception::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitDetail {
    pub unit: dispense_unit::Model,
    pub usage_claims: Vec<usage_claim::Model>,
    pub return_claims: Vec<return_claim::Model>,
}

/// Roll-up over stored comparison rows. Sums are taken from the rows
/// themselves rather than re-folded, so the summary always agrees with
/// the per-window listing it sits on top of.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationSummary {
    pub windows: u64,
    pub total_dispensed: i64,
    pub total_used: i64,
    pub total_returned: i64,
    pub total_pending: i64,
    pub total_difference: i64,
    pub status_counts: Vec<StatusCount>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusCount {
    #[schema(value_type = String)]
    pub status: ComparisonStatus,
    pub windows: u64,
}

#[derive(FromQueryResult)]
struct SummaryAggRow {
    windows: i64,
    dispensed: Option<i64>,
    used: Option<i64>,
    returned: Option<i64>,
    pending: Option<i64>,
    difference: Option<i64>,
}

#[derive(FromQueryResult)]
struct StatusCountRow {
    status: ComparisonStatus,
    windows: i64,
}

fn filtered_comparisons(filter: &ComparisonFilter) -> Select<comparison_row::Entity> {
    let mut query = comparison_row::Entity::find();
    if filter.needs_catalog_join() {
        query = query.join(
            JoinType::InnerJoin,
            comparison_row::Relation::ItemMaster.def(),
        );
    }
    if let Some(from) = filter.from {
        query = query.filter(comparison_row::Column::Window.gte(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(comparison_row::Column::Window.lte(to));
    }
    if let Some(item_code) = &filter.item_code {
        query = query.filter(comparison_row::Column::ItemCode.eq(item_code.clone()));
    }
    if let Some(status) = filter.status {
        query = query.filter(comparison_row::Column::Status.eq(status));
    }
    if let Some(dept) = &filter.department_code {
        query = query.filter(item_master::Column::DepartmentCode.eq(dept.clone()));
    }
    if let Some(item_type) = &filter.item_type {
        query = query.filter(item_master::Column::ItemType.eq(item_type.clone()));
    }
    query
}

/// Read-only projections for dashboards and exports. Never mutates and
/// never recomputes; it reports what the write path has materialized.
#[derive(Clone)]
pub struct ReportingService {
    db_pool: Arc<DbPool>,
}

impl ReportingService {
    /// Creates a new reporting service instance
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Pages through comparison rows, newest window first.
    #[instrument(skip(self, filter))]
    pub async fn list_comparisons(
        &self,
        filter: &ComparisonFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<comparison_row::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = filtered_comparisons(filter)
            .order_by_desc(comparison_row::Column::Window)
            .order_by_asc(comparison_row::Column::ItemCode)
            .paginate(db, limit);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let rows = paginator
            .fetch_page(page.max(1) - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((rows, total))
    }

    /// One window with everything that fed it.
    #[instrument(skip(self))]
    pub async fn get_comparison(
        &self,
        item_code: &str,
        window: NaiveDate,
    ) -> Result<ComparisonDetail, ServiceError> {
        let db = &*self.db_pool;

        let row = comparison_row::Entity::find()
            .filter(comparison_row::Column::ItemCode.eq(item_code))
            .filter(comparison_row::Column::Window.eq(window))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no comparison row for item {} in window {}",
                    item_code, window
                ))
            })?;

        let (start, end) = window_bounds(window);
        let units = dispense_unit::Entity::find()
            .filter(dispense_unit::Column::ItemCode.eq(item_code))
            .filter(dispense_unit::Column::DispensedAt.gte(start))
            .filter(dispense_unit::Column::DispensedAt.lt(end))
            .order_by_asc(dispense_unit::Column::DispensedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let usage_claims = usage_claim::Entity::find()
            .filter(usage_claim::Column::ItemCode.eq(item_code))
            .filter(usage_claim::Column::ClaimWindow.eq(window))
            .order_by_asc(usage_claim::Column::RecordedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let return_claims = return_claim::Entity::find()
            .filter(return_claim::Column::ItemCode.eq(item_code))
            .filter(return_claim::Column::ClaimWindow.eq(window))
            .order_by_asc(return_claim::Column::RecordedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut claim_ids: Vec<Uuid> = usage_claims.iter().map(|c| c.id).collect();
        claim_ids.extend(return_claims.iter().map(|c| c.id));
        let exceptions = if claim_ids.is_empty() {
            Vec::new()
        } else {
            claim_exception::Entity::find()
                .filter(claim_exception::Column::ClaimId.is_in(claim_ids))
                .order_by_asc(claim_exception::Column::CreatedAt)
                .all(db)
                .await
                .map_err(ServiceError::DatabaseError)?
        };

        Ok(ComparisonDetail {
            row,
            units,
            usage_claims,
            return_claims,
            exceptions,
        })
    }

    /// Period roll-up for the finance export.
    #[instrument(skip(self, filter))]
    pub async fn summary(
        &self,
        filter: &ComparisonFilter,
    ) -> Result<ReconciliationSummary, ServiceError> {
        let db = &*self.db_pool;

        let totals = filtered_comparisons(filter)
            .select_only()
            .column_as(comparison_row::Column::Id.count(), "windows")
            .column_as(comparison_row::Column::TotalDispensed.sum(), "dispensed")
            .column_as(comparison_row::Column::TotalUsed.sum(), "used")
            .column_as(comparison_row::Column::TotalReturned.sum(), "returned")
            .column_as(comparison_row::Column::TotalPending.sum(), "pending")
            .column_as(comparison_row::Column::Difference.sum(), "difference")
            .into_model::<SummaryAggRow>()
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let counts = filtered_comparisons(filter)
            .select_only()
            .column(comparison_row::Column::Status)
            .column_as(comparison_row::Column::Id.count(), "windows")
            .group_by(comparison_row::Column::Status)
            .into_model::<StatusCountRow>()
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut summary = ReconciliationSummary {
            windows: 0,
            total_dispensed: 0,
            total_used: 0,
            total_returned: 0,
            total_pending: 0,
            total_difference: 0,
            status_counts: counts
                .into_iter()
                .map(|c| StatusCount {
                    status: c.status,
                    windows: c.windows.max(0) as u64,
                })
                .collect(),
        };
        if let Some(t) = totals {
            summary.windows = t.windows.max(0) as u64;
            summary.total_dispensed = t.dispensed.unwrap_or(0);
            summary.total_used = t.used.unwrap_or(0);
            summary.total_returned = t.returned.unwrap_or(0);
            summary.total_pending = t.pending.unwrap_or(0);
            summary.total_difference = t.difference.unwrap_or(0);
        }
        Ok(summary)
    }

    /// Pages through dispense units, newest dispense first.
    #[instrument(skip(self, filter))]
    pub async fn list_units(
        &self,
        filter: &UnitFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<dispense_unit::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let mut query = dispense_unit::Entity::find();
        if let Some(item_code) = &filter.item_code {
            query = query.filter(dispense_unit::Column::ItemCode.eq(item_code.clone()));
        }
        if let Some(cabinet_id) = &filter.cabinet_id {
            query = query.filter(dispense_unit::Column::CabinetId.eq(cabinet_id.clone()));
        }
        if let Some(status) = filter.status {
            query = query.filter(dispense_unit::Column::Status.eq(status));
        }
        if filter.open_only {
            query = query.filter(dispense_unit::Column::QtyPending.gt(0));
        }
        let paginator = query
            .order_by_desc(dispense_unit::Column::DispensedAt)
            .paginate(db, limit);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let units = paginator
            .fetch_page(page.max(1) - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((units, total))
    }

    /// One unit by its external identifier, with the claims that touched it.
    #[instrument(skip(self))]
    pub async fn get_unit(&self, unit_id: &str) -> Result<UnitDetail, ServiceError> {
        let db = &*self.db_pool;
        let unit = dispense_unit::Entity::find()
            .filter(dispense_unit::Column::UnitId.eq(unit_id))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("unit {} not found", unit_id)))?;

        let usage_claims = usage_claim::Entity::find()
            .filter(usage_claim::Column::UnitId.eq(unit_id))
            .order_by_asc(usage_claim::Column::RecordedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let return_claims = return_claim::Entity::find()
            .filter(return_claim::Column::UnitId.eq(unit_id))
            .order_by_asc(return_claim::Column::RecordedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(UnitDetail {
            unit,
            usage_claims,
            return_claims,
        })
    }

    /// Pages through exceptions, newest first.
    #[instrument(skip(self, filter))]
    pub async fn list_exceptions(
        &self,
        filter: &ExceptionFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<claim_exception::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let mut query = claim_exception::Entity::find();
        if let Some(resolved) = filter.resolved {
            query = query.filter(claim_exception::Column::Resolved.eq(resolved));
        }
        if let Some(reason) = filter.reason {
            query = query.filter(claim_exception::Column::Reason.eq(reason));
        }
        if let Some(kind) = filter.claim_kind {
            query = query.filter(claim_exception::Column::ClaimKind.eq(kind));
        }
        if let Some(item_code) = &filter.item_code {
            query = query.filter(claim_exception::Column::ItemCode.eq(item_code.clone()));
        }
        let paginator = query
            .order_by_desc(claim_exception::Column::CreatedAt)
            .paginate(db, limit);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let exceptions = paginator
            .fetch_page(page.max(1) - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((exceptions, total))
    }
}
