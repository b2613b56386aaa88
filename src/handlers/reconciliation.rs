use crate::{
    commands::admin::rebuild_windows_command::RebuildWindowsCommand,
    commands::exceptions::resolve_exception_command::ResolveExceptionCommand,
    entities::{
        claim_exception, comparison_row, dispense_unit, ClaimKind, ComparisonStatus,
        ExceptionReason, ItemStatus,
    },
    errors::ServiceError,
    handlers::claims::{ReturnClaimResponse, UsageClaimResponse},
    services::reporting::{
        ComparisonDetail, ComparisonFilter, ExceptionFilter, ReconciliationSummary, UnitDetail,
        UnitFilter,
    },
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One `(item_code, window)` line of the dispense-vs-usage comparison.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComparisonRowResponse {
    pub id: Uuid,
    pub item_code: String,
    pub window: NaiveDate,
    pub total_dispensed: i64,
    pub total_used: i64,
    pub total_returned: i64,
    pub total_pending: i64,
    pub difference: i64,
    pub status: String,
    pub first_dispensed_at: Option<DateTime<Utc>>,
    pub last_dispensed_at: Option<DateTime<Utc>>,
    pub first_used_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

impl From<comparison_row::Model> for ComparisonRowResponse {
    fn from(row: comparison_row::Model) -> Self {
        Self {
            id: row.id,
            item_code: row.item_code,
            window: row.window,
            total_dispensed: row.total_dispensed,
            total_used: row.total_used,
            total_returned: row.total_returned,
            total_pending: row.total_pending,
            difference: row.difference,
            status: row.status.to_string(),
            first_dispensed_at: row.first_dispensed_at,
            last_dispensed_at: row.last_dispensed_at,
            first_used_at: row.first_used_at,
            last_used_at: row.last_used_at,
            computed_at: row.computed_at,
        }
    }
}

/// A tracked physical piece with its running tallies.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnitResponse {
    pub unit_id: String,
    pub item_code: String,
    pub cabinet_id: String,
    pub slot_no: i32,
    pub actor_id: String,
    pub qty_dispensed: i32,
    pub qty_used: i32,
    pub qty_returned: i32,
    pub qty_pending: i32,
    pub status: String,
    pub reported_status: Option<String>,
    pub dispensed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<dispense_unit::Model> for UnitResponse {
    fn from(unit: dispense_unit::Model) -> Self {
        Self {
            unit_id: unit.unit_id,
            item_code: unit.item_code,
            cabinet_id: unit.cabinet_id,
            slot_no: unit.slot_no,
            actor_id: unit.actor_id,
            qty_dispensed: unit.qty_dispensed,
            qty_used: unit.qty_used,
            qty_returned: unit.qty_returned,
            qty_pending: unit.qty_pending,
            status: unit.status.to_string(),
            reported_status: unit.reported_status,
            dispensed_at: unit.dispensed_at,
            updated_at: unit.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExceptionResponse {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub claim_kind: String,
    pub reason: String,
    pub item_code: String,
    pub qty: i32,
    pub detail: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl From<claim_exception::Model> for ExceptionResponse {
    fn from(exception: claim_exception::Model) -> Self {
        Self {
            id: exception.id,
            claim_id: exception.claim_id,
            claim_kind: exception.claim_kind.to_string(),
            reason: exception.reason.to_string(),
            item_code: exception.item_code,
            qty: exception.qty,
            detail: exception.detail,
            resolved: exception.resolved,
            created_at: exception.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ComparisonDetailResponse {
    pub row: ComparisonRowResponse,
    pub units: Vec<UnitResponse>,
    pub usage_claims: Vec<UsageClaimResponse>,
    pub return_claims: Vec<ReturnClaimResponse>,
    pub exceptions: Vec<ExceptionResponse>,
}

impl From<ComparisonDetail> for ComparisonDetailResponse {
    fn from(detail: ComparisonDetail) -> Self {
        Self {
            row: detail.row.into(),
            units: detail.units.into_iter().map(Into::into).collect(),
            usage_claims: detail.usage_claims.into_iter().map(Into::into).collect(),
            return_claims: detail.return_claims.into_iter().map(Into::into).collect(),
            exceptions: detail.exceptions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnitDetailResponse {
    pub unit: UnitResponse,
    pub usage_claims: Vec<UsageClaimResponse>,
    pub return_claims: Vec<ReturnClaimResponse>,
}

impl From<UnitDetail> for UnitDetailResponse {
    fn from(detail: UnitDetail) -> Self {
        Self {
            unit: detail.unit.into(),
            usage_claims: detail.usage_claims.into_iter().map(Into::into).collect(),
            return_claims: detail.return_claims.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveExceptionResponse {
    pub exception: ExceptionResponse,
    /// True when the exception was closed by an earlier call.
    pub already_resolved: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RebuildWindowsRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub item_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RebuildWindowsResponse {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub rows: u64,
}

#[derive(Debug, Deserialize)]
pub struct ComparisonListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub item_code: Option<String>,
    pub status: Option<String>,
    pub department_code: Option<String>,
    pub item_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnitListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub item_code: Option<String>,
    pub cabinet_id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub open_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExceptionListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub resolved: Option<bool>,
    pub reason: Option<String>,
    pub claim_kind: Option<String>,
    pub item_code: Option<String>,
}

fn parse_comparison_status(raw: &str) -> Result<ComparisonStatus, ServiceError> {
    ComparisonStatus::parse_filter(raw)
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown comparison status: {}", raw)))
}

fn parse_item_status(raw: &str) -> Result<ItemStatus, ServiceError> {
    ItemStatus::parse_reported(raw)
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown unit status: {}", raw)))
}

fn parse_exception_reason(raw: &str) -> Result<ExceptionReason, ServiceError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "OVER_CLAIM" => Ok(ExceptionReason::OverClaim),
        "UNMATCHED_CLAIM" => Ok(ExceptionReason::UnmatchedClaim),
        "DUPLICATE_CLAIM" => Ok(ExceptionReason::DuplicateClaim),
        other => Err(ServiceError::InvalidInput(format!(
            "unknown exception reason: {}",
            other
        ))),
    }
}

fn parse_claim_kind(raw: &str) -> Result<ClaimKind, ServiceError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "usage" => Ok(ClaimKind::Usage),
        "return" => Ok(ClaimKind::Return),
        other => Err(ServiceError::InvalidInput(format!(
            "unknown claim kind: {}",
            other
        ))),
    }
}

fn comparison_filter(query: &ComparisonListQuery) -> Result<ComparisonFilter, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(parse_comparison_status)
        .transpose()?;
    Ok(ComparisonFilter {
        from: query.from,
        to: query.to,
        item_code: query.item_code.clone(),
        status,
        department_code: query.department_code.clone(),
        item_type: query.item_type.clone(),
    })
}

/// List comparison rows
#[utoipa::path(
    get,
    path = "/api/v1/comparisons",
    summary = "List comparison rows",
    description = "Pages through per-item, per-day dispense-vs-usage comparison rows, newest window first",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("from" = Option<String>, Query, description = "Earliest window (ISO date, inclusive)"),
        ("to" = Option<String>, Query, description = "Latest window (ISO date, inclusive)"),
        ("item_code" = Option<String>, Query, description = "Filter by item code"),
        ("status" = Option<String>, Query, description = "Filter by comparison status"),
        ("department_code" = Option<String>, Query, description = "Filter by owning department"),
        ("item_type" = Option<String>, Query, description = "Filter by catalog item type"),
    ),
    responses(
        (status = 200, description = "Comparison rows retrieved successfully", body = ApiResponse<PaginatedResponse<ComparisonRowResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_comparisons(
    State(state): State<AppState>,
    Query(query): Query<ComparisonListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ComparisonRowResponse>>>, ServiceError> {
    let filter = comparison_filter(&query)?;
    let limit = query.limit.clamp(1, state.config.api_max_page_size as u64);

    let (rows, total) = state
        .services
        .reporting
        .list_comparisons(&filter, query.page, limit)
        .await?;
    let total_pages = (total + limit - 1) / limit;
    let items: Vec<ComparisonRowResponse> = rows.into_iter().map(Into::into).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit,
        total_pages,
    })))
}

/// Roll up comparison rows
#[utoipa::path(
    get,
    path = "/api/v1/comparisons/summary",
    summary = "Summarize comparison rows",
    description = "Aggregate totals and a per-status breakdown over the filtered comparison rows",
    params(
        ("from" = Option<String>, Query, description = "Earliest window (ISO date, inclusive)"),
        ("to" = Option<String>, Query, description = "Latest window (ISO date, inclusive)"),
        ("item_code" = Option<String>, Query, description = "Filter by item code"),
        ("status" = Option<String>, Query, description = "Filter by comparison status"),
        ("department_code" = Option<String>, Query, description = "Filter by owning department"),
        ("item_type" = Option<String>, Query, description = "Filter by catalog item type"),
    ),
    responses(
        (status = 200, description = "Summary computed successfully", body = ApiResponse<ReconciliationSummary>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<ComparisonListQuery>,
) -> Result<Json<ApiResponse<ReconciliationSummary>>, ServiceError> {
    let filter = comparison_filter(&query)?;
    let summary = state.services.reporting.summary(&filter).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Get one comparison row with its contributing records
#[utoipa::path(
    get,
    path = "/api/v1/comparisons/{item_code}/{window}",
    summary = "Get comparison detail",
    description = "One comparison row plus every unit, claim and exception that contributed to it",
    params(
        ("item_code" = String, Path, description = "Item code"),
        ("window" = String, Path, description = "Comparison window (ISO date)"),
    ),
    responses(
        (status = 200, description = "Comparison retrieved successfully", body = ApiResponse<ComparisonDetailResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid window date", body = crate::errors::ErrorResponse),
        (status = 404, description = "Comparison not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_comparison(
    State(state): State<AppState>,
    Path((item_code, window)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ComparisonDetailResponse>>, ServiceError> {
    let window: NaiveDate = window
        .parse()
        .map_err(|_| ServiceError::InvalidInput(format!("window must be an ISO date: {}", window)))?;
    let detail = state
        .services
        .reporting
        .get_comparison(&item_code, window)
        .await?;
    Ok(Json(ApiResponse::success(detail.into())))
}

/// List dispense units
#[utoipa::path(
    get,
    path = "/api/v1/units",
    summary = "List dispense units",
    description = "Pages through tracked dispense units with their running tallies",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("item_code" = Option<String>, Query, description = "Filter by item code"),
        ("cabinet_id" = Option<String>, Query, description = "Filter by cabinet"),
        ("status" = Option<String>, Query, description = "Filter by unit status"),
        ("open_only" = Option<bool>, Query, description = "Only units with pending quantity"),
    ),
    responses(
        (status = 200, description = "Units retrieved successfully", body = ApiResponse<PaginatedResponse<UnitResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_units(
    State(state): State<AppState>,
    Query(query): Query<UnitListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<UnitResponse>>>, ServiceError> {
    let status = query.status.as_deref().map(parse_item_status).transpose()?;
    let filter = UnitFilter {
        item_code: query.item_code,
        cabinet_id: query.cabinet_id,
        status,
        open_only: query.open_only,
    };
    let limit = query.limit.clamp(1, state.config.api_max_page_size as u64);

    let (units, total) = state
        .services
        .reporting
        .list_units(&filter, query.page, limit)
        .await?;
    let total_pages = (total + limit - 1) / limit;
    let items: Vec<UnitResponse> = units.into_iter().map(Into::into).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit,
        total_pages,
    })))
}

/// Get one dispense unit with its claims
#[utoipa::path(
    get,
    path = "/api/v1/units/{unit_id}",
    summary = "Get unit detail",
    description = "One dispense unit plus the usage and return claims applied against it",
    params(("unit_id" = String, Path, description = "Unit id (RFID tag or synthesized)")),
    responses(
        (status = 200, description = "Unit retrieved successfully", body = ApiResponse<UnitDetailResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 404, description = "Unit not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
) -> Result<Json<ApiResponse<UnitDetailResponse>>, ServiceError> {
    let detail = state.services.reporting.get_unit(&unit_id).await?;
    Ok(Json(ApiResponse::success(detail.into())))
}

/// List claim exceptions
#[utoipa::path(
    get,
    path = "/api/v1/exceptions",
    summary = "List claim exceptions",
    description = "Pages through refused or flagged claim quantities, newest first",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("resolved" = Option<bool>, Query, description = "Filter by resolution state"),
        ("reason" = Option<String>, Query, description = "Filter by exception reason"),
        ("claim_kind" = Option<String>, Query, description = "Filter by claim kind (usage or return)"),
        ("item_code" = Option<String>, Query, description = "Filter by item code"),
    ),
    responses(
        (status = 200, description = "Exceptions retrieved successfully", body = ApiResponse<PaginatedResponse<ExceptionResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_exceptions(
    State(state): State<AppState>,
    Query(query): Query<ExceptionListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ExceptionResponse>>>, ServiceError> {
    let reason = query
        .reason
        .as_deref()
        .map(parse_exception_reason)
        .transpose()?;
    let claim_kind = query
        .claim_kind
        .as_deref()
        .map(parse_claim_kind)
        .transpose()?;
    let filter = ExceptionFilter {
        resolved: query.resolved,
        reason,
        claim_kind,
        item_code: query.item_code,
    };
    let limit = query.limit.clamp(1, state.config.api_max_page_size as u64);

    let (exceptions, total) = state
        .services
        .reporting
        .list_exceptions(&filter, query.page, limit)
        .await?;
    let total_pages = (total + limit - 1) / limit;
    let items: Vec<ExceptionResponse> = exceptions.into_iter().map(Into::into).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit,
        total_pages,
    })))
}

/// Resolve a claim exception
#[utoipa::path(
    post,
    path = "/api/v1/exceptions/{id}/resolve",
    summary = "Resolve exception",
    description = "Marks an exception as handled; resolving twice is a no-op",
    params(("id" = String, Path, description = "Exception ID")),
    responses(
        (status = 200, description = "Exception resolved", body = ApiResponse<ResolveExceptionResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 404, description = "Exception not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn resolve_exception(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ResolveExceptionResponse>>, ServiceError> {
    let command = ResolveExceptionCommand { exception_id: id };
    let result = state.services.reconciliation.resolve_exception(command).await?;
    Ok(Json(ApiResponse::success(ResolveExceptionResponse {
        exception: result.exception.into(),
        already_resolved: result.already_resolved,
    })))
}

/// Rebuild comparison windows
#[utoipa::path(
    post,
    path = "/api/v1/admin/rebuild-windows",
    summary = "Rebuild comparison windows",
    description = "Recomputes every comparison row with activity inside the date range",
    request_body = RebuildWindowsRequest,
    responses(
        (status = 200, description = "Windows rebuilt", body = ApiResponse<RebuildWindowsResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn rebuild_windows(
    State(state): State<AppState>,
    Json(request): Json<RebuildWindowsRequest>,
) -> Result<Json<ApiResponse<RebuildWindowsResponse>>, ServiceError> {
    let command = RebuildWindowsCommand {
        from: request.from,
        to: request.to,
        item_code: request.item_code,
    };
    let result = state.services.reconciliation.rebuild_windows(command).await?;
    Ok(Json(ApiResponse::success(RebuildWindowsResponse {
        from: result.from,
        to: result.to,
        rows: result.rows,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_parsing_is_case_insensitive() {
        assert_eq!(
            parse_comparison_status("matched").ok(),
            Some(ComparisonStatus::Matched)
        );
        assert_eq!(
            parse_comparison_status(" DISPENSED_NOT_USED ").ok(),
            Some(ComparisonStatus::DispensedNotUsed)
        );
        assert!(parse_comparison_status("bogus").is_err());
    }

    #[test]
    fn claim_kind_filter_accepts_both_kinds() {
        assert_eq!(parse_claim_kind("usage").ok(), Some(ClaimKind::Usage));
        assert_eq!(parse_claim_kind("Return").ok(), Some(ClaimKind::Return));
        assert!(parse_claim_kind("refund").is_err());
    }

    #[test]
    fn exception_reason_filter_rejects_unknown_values() {
        assert_eq!(
            parse_exception_reason("over_claim").ok(),
            Some(ExceptionReason::OverClaim)
        );
        assert!(parse_exception_reason("SHORT_CLAIM").is_err());
    }
}
