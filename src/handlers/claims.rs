use crate::{
    commands::claims::record_return_command::RecordReturnCommand,
    commands::claims::record_reversal_command::RecordReversalCommand,
    commands::claims::record_usage_command::RecordUsageCommand,
    commands::claims::ClaimIngestResult,
    entities::{return_claim, reversal, usage_claim, ClaimKind, ReturnReason},
    errors::ServiceError,
    handlers::reconciliation::ComparisonRowResponse,
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A billed-usage report as the clinical system posts it.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordUsageRequest {
    #[validate(length(min = 1, message = "source_system_id cannot be empty"))]
    pub source_system_id: String,
    /// Idempotency key within the source system.
    #[validate(length(min = 1, message = "external_reference cannot be empty"))]
    pub external_reference: String,
    #[validate(length(min = 1, message = "encounter_id cannot be empty"))]
    pub encounter_id: String,
    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,
    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,
    /// Targets a unit directly; blank or absent means FIFO matching.
    pub unit_id: Option<String>,
    pub actor_id: Option<String>,
    pub reported_status: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordReturnRequest {
    #[validate(length(min = 1, message = "source_system_id cannot be empty"))]
    pub source_system_id: String,
    #[validate(length(min = 1, message = "external_reference cannot be empty"))]
    pub external_reference: String,
    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,
    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,
    pub unit_id: Option<String>,
    pub actor_id: Option<String>,
    #[schema(value_type = String, example = "UNWRAPPED_UNUSED")]
    pub reason: ReturnReason,
    pub note: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordReversalRequest {
    /// Which side of the ledger to subtract from: "usage" or "return".
    #[schema(value_type = String, example = "usage")]
    pub claim_kind: ClaimKind,
    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,
    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,
    pub window: NaiveDate,
    #[validate(length(min = 1, message = "reason cannot be empty"))]
    pub reason: String,
    #[validate(length(min = 1, message = "filed_by cannot be empty"))]
    pub filed_by: String,
}

/// Outcome of one claim ingestion, duplicate-safe.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClaimIngestResponse {
    pub claim_id: Uuid,
    /// APPLIED, REJECTED or DUPLICATE.
    pub outcome: String,
    pub item_code: String,
    pub qty: i32,
    pub claim_window: NaiveDate,
    pub applied_unit_ids: Vec<String>,
    pub exception_ids: Vec<Uuid>,
    pub comparison: Option<ComparisonRowResponse>,
}

impl From<ClaimIngestResult> for ClaimIngestResponse {
    fn from(result: ClaimIngestResult) -> Self {
        Self {
            claim_id: result.claim_id,
            outcome: result.outcome.to_string(),
            item_code: result.item_code,
            qty: result.qty,
            claim_window: result.claim_window,
            applied_unit_ids: result.applied_unit_ids,
            exception_ids: result.exception_ids,
            comparison: result.comparison.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UsageClaimResponse {
    pub id: Uuid,
    pub source_system_id: String,
    pub external_reference: String,
    pub encounter_id: String,
    pub item_code: String,
    pub qty: i32,
    pub unit_id: Option<String>,
    pub actor_id: Option<String>,
    pub reported_status: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
    pub claim_window: NaiveDate,
    pub outcome: String,
}

impl From<usage_claim::Model> for UsageClaimResponse {
    fn from(claim: usage_claim::Model) -> Self {
        Self {
            id: claim.id,
            source_system_id: claim.source_system_id,
            external_reference: claim.external_reference,
            encounter_id: claim.encounter_id,
            item_code: claim.item_code,
            qty: claim.qty,
            unit_id: claim.unit_id,
            actor_id: claim.actor_id,
            reported_status: claim.reported_status,
            unit_cost: claim.unit_cost,
            recorded_at: claim.recorded_at,
            claim_window: claim.claim_window,
            outcome: claim.outcome.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReturnClaimResponse {
    pub id: Uuid,
    pub source_system_id: String,
    pub external_reference: String,
    pub item_code: String,
    pub qty: i32,
    pub unit_id: Option<String>,
    pub actor_id: Option<String>,
    pub reason: String,
    pub note: Option<String>,
    pub unit_cost: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
    pub claim_window: NaiveDate,
    pub outcome: String,
}

impl From<return_claim::Model> for ReturnClaimResponse {
    fn from(claim: return_claim::Model) -> Self {
        Self {
            id: claim.id,
            source_system_id: claim.source_system_id,
            external_reference: claim.external_reference,
            item_code: claim.item_code,
            qty: claim.qty,
            unit_id: claim.unit_id,
            actor_id: claim.actor_id,
            reason: claim.reason.to_string(),
            note: claim.note,
            unit_cost: claim.unit_cost,
            recorded_at: claim.recorded_at,
            claim_window: claim.claim_window,
            outcome: claim.outcome.to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReversalResponse {
    pub id: Uuid,
    pub claim_kind: String,
    pub item_code: String,
    pub qty: i32,
    pub window: NaiveDate,
    pub reason: String,
    pub filed_by: String,
    pub created_at: DateTime<Utc>,
    pub comparison: ComparisonRowResponse,
}

impl ReversalResponse {
    fn new(reversal: reversal::Model, comparison: ComparisonRowResponse) -> Self {
        Self {
            id: reversal.id,
            claim_kind: reversal.claim_kind.to_string(),
            item_code: reversal.item_code,
            qty: reversal.qty,
            window: reversal.window,
            reason: reversal.reason,
            filed_by: reversal.filed_by,
            created_at: reversal.created_at,
            comparison,
        }
    }
}

fn flatten_validation_errors(validation_errors: validator::ValidationErrors) -> Vec<String> {
    validation_errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            let field = field.clone();
            errors.iter().map(move |error| {
                format!(
                    "{}: {}",
                    field,
                    error.message.as_ref().unwrap_or(&"Invalid value".into())
                )
            })
        })
        .collect()
}

/// Record a usage claim
#[utoipa::path(
    post,
    path = "/api/v1/claims/usage",
    summary = "Record usage claim",
    description = "Ingests one billed-usage report and matches it against open dispense units. \
                   Replays of the same (source_system_id, external_reference) come back as DUPLICATE.",
    request_body = RecordUsageRequest,
    responses(
        (status = 200, description = "Claim processed", body = ApiResponse<ClaimIngestResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn record_usage(
    State(state): State<AppState>,
    Json(request): Json<RecordUsageRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ClaimIngestResponse>>), ServiceError> {
    // Validate the request
    if let Err(validation_errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(flatten_validation_errors(
                validation_errors,
            ))),
        ));
    }

    let command = RecordUsageCommand {
        source_system_id: request.source_system_id,
        external_reference: request.external_reference,
        encounter_id: request.encounter_id,
        item_code: request.item_code,
        qty: request.qty,
        unit_id: request.unit_id,
        actor_id: request.actor_id,
        reported_status: request.reported_status,
        unit_cost: request.unit_cost,
        recorded_at: request.recorded_at,
        lookback_hours: None,
    };
    let result = state.services.reconciliation.record_usage(command).await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(result.into()))))
}

/// Record a return claim
#[utoipa::path(
    post,
    path = "/api/v1/claims/returns",
    summary = "Record return claim",
    description = "Ingests one give-back confirmation and matches it against open dispense units",
    request_body = RecordReturnRequest,
    responses(
        (status = 200, description = "Claim processed", body = ApiResponse<ClaimIngestResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn record_return(
    State(state): State<AppState>,
    Json(request): Json<RecordReturnRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ClaimIngestResponse>>), ServiceError> {
    // Validate the request
    if let Err(validation_errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(flatten_validation_errors(
                validation_errors,
            ))),
        ));
    }

    let command = RecordReturnCommand {
        source_system_id: request.source_system_id,
        external_reference: request.external_reference,
        item_code: request.item_code,
        qty: request.qty,
        unit_id: request.unit_id,
        actor_id: request.actor_id,
        reason: request.reason,
        note: request.note,
        unit_cost: request.unit_cost,
        recorded_at: request.recorded_at,
        lookback_hours: None,
    };
    let result = state.services.reconciliation.record_return(command).await?;

    Ok((StatusCode::OK, Json(ApiResponse::success(result.into()))))
}

/// File a reversal against a window
#[utoipa::path(
    post,
    path = "/api/v1/claims/reversals",
    summary = "File reversal",
    description = "Subtracts a previously over-counted quantity from one window's usage or return total",
    request_body = RecordReversalRequest,
    responses(
        (status = 201, description = "Reversal filed", body = ApiResponse<ReversalResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn record_reversal(
    State(state): State<AppState>,
    Json(request): Json<RecordReversalRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReversalResponse>>), ServiceError> {
    // Validate the request
    if let Err(validation_errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(flatten_validation_errors(
                validation_errors,
            ))),
        ));
    }

    let command = RecordReversalCommand {
        claim_kind: request.claim_kind,
        item_code: request.item_code,
        qty: request.qty,
        window: request.window,
        reason: request.reason,
        filed_by: request.filed_by,
    };
    let result = state
        .services
        .reconciliation
        .record_reversal(command)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ReversalResponse::new(
            result.reversal,
            result.comparison.into(),
        ))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_request_rejects_blank_reference() {
        let request = RecordUsageRequest {
            source_system_id: "HIS-A".into(),
            external_reference: "".into(),
            encounter_id: "HN01/EN02".into(),
            item_code: "GAUZE-10".into(),
            qty: 1,
            unit_id: None,
            actor_id: None,
            reported_status: None,
            unit_cost: None,
            recorded_at: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn validation_errors_flatten_to_field_messages() {
        let request = RecordReversalRequest {
            claim_kind: ClaimKind::Usage,
            item_code: "".into(),
            qty: 0,
            window: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            reason: "typo".into(),
            filed_by: "coordinator-7".into(),
        };
        let errors = flatten_validation_errors(request.validate().unwrap_err());
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.starts_with("item_code:")));
        assert!(errors.iter().any(|e| e.starts_with("qty:")));
    }

    #[test]
    fn return_reason_parses_from_wire_form() {
        let raw = r#"{
            "source_system_id": "HIS-A",
            "external_reference": "RET-1",
            "item_code": "GAUZE-10",
            "qty": 1,
            "reason": "UNWRAPPED_UNUSED"
        }"#;
        let request: RecordReturnRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.reason, ReturnReason::UnwrappedUnused);
        assert!(request.validate().is_ok());
    }
}
