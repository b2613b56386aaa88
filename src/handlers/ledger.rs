use crate::{
    commands::ledger::append_delta_command::AppendDeltaCommand,
    entities::slot_delta,
    errors::ServiceError,
    handlers::reconciliation::{ComparisonRowResponse, UnitResponse},
    services::ledger::{DeltaFilter, DeltaSign, OnHandSummary},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// One slot movement as a cabinet posts it.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AppendDeltaRequest {
    #[validate(length(min = 1, message = "cabinet_id cannot be empty"))]
    pub cabinet_id: String,
    #[validate(range(min = 0, message = "slot_no cannot be negative"))]
    pub slot_no: i32,
    #[validate(length(min = 1, message = "item_code cannot be empty"))]
    pub item_code: String,
    /// "take"/"-" or "refill"/"+".
    #[validate(length(min = 1, message = "sign cannot be empty"))]
    pub sign: String,
    #[validate(range(min = 1, message = "qty must be at least 1"))]
    pub qty: i32,
    /// RFID tag scanned at the door, when the cabinet has a reader.
    pub unit_id: Option<String>,
    #[validate(length(min = 1, message = "actor_id cannot be empty"))]
    pub actor_id: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeltaResponse {
    pub id: Uuid,
    pub cabinet_id: String,
    pub slot_no: i32,
    pub item_code: String,
    /// Negative = take, positive = refill.
    pub delta_qty: i32,
    pub actor_id: String,
    pub dispense_unit_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<slot_delta::Model> for DeltaResponse {
    fn from(delta: slot_delta::Model) -> Self {
        Self {
            id: delta.id,
            cabinet_id: delta.cabinet_id,
            slot_no: delta.slot_no,
            item_code: delta.item_code,
            delta_qty: delta.delta_qty,
            actor_id: delta.actor_id,
            dispense_unit_id: delta.dispense_unit_id,
            recorded_at: delta.recorded_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AppendDeltaResponse {
    pub delta: DeltaResponse,
    /// Present when the take spawned a tracked dispense unit.
    pub unit: Option<UnitResponse>,
    /// Present when the append recomputed the day's comparison row.
    pub comparison: Option<ComparisonRowResponse>,
    pub on_hand_after: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeltaListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
    pub sign: Option<String>,
    pub cabinet_id: Option<String>,
    pub item_code: Option<String>,
    pub recorded_from: Option<DateTime<Utc>>,
    pub recorded_to: Option<DateTime<Utc>>,
}

/// Append a slot delta
#[utoipa::path(
    post,
    path = "/api/v1/ledger/deltas",
    summary = "Append slot delta",
    description = "Validates and appends one signed slot movement; takes of tracked items spawn a dispense unit",
    request_body = AppendDeltaRequest,
    responses(
        (status = 201, description = "Delta appended", body = ApiResponse<AppendDeltaResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Delta rejected", body = crate::errors::ErrorResponse),
        (status = 409, description = "Unit id already exists", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn append_delta(
    State(state): State<AppState>,
    Json(request): Json<AppendDeltaRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AppendDeltaResponse>>), ServiceError> {
    // Validate the request
    if let Err(validation_errors) = request.validate() {
        let errors: Vec<String> = validation_errors
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
            .collect();
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(errors)),
        ));
    }

    let command = AppendDeltaCommand {
        cabinet_id: request.cabinet_id,
        slot_no: request.slot_no,
        item_code: request.item_code,
        sign: request.sign,
        qty: request.qty,
        unit_id: request.unit_id,
        actor_id: request.actor_id,
        recorded_at: request.recorded_at,
    };
    let result = state.services.ledger.append_delta(command).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AppendDeltaResponse {
            delta: result.delta.into(),
            unit: result.unit.map(Into::into),
            comparison: result.comparison.map(Into::into),
            on_hand_after: result.on_hand_after,
        })),
    ))
}

/// List slot deltas
#[utoipa::path(
    get,
    path = "/api/v1/ledger/deltas",
    summary = "List slot deltas",
    description = "Pages through the raw movement ledger, newest first",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20)"),
        ("sign" = Option<String>, Query, description = "Filter by direction (take or refill)"),
        ("cabinet_id" = Option<String>, Query, description = "Filter by cabinet"),
        ("item_code" = Option<String>, Query, description = "Filter by item code"),
        ("recorded_from" = Option<String>, Query, description = "Earliest recorded_at (RFC 3339, inclusive)"),
        ("recorded_to" = Option<String>, Query, description = "Latest recorded_at (RFC 3339, exclusive)"),
    ),
    responses(
        (status = 200, description = "Deltas retrieved successfully", body = ApiResponse<PaginatedResponse<DeltaResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_deltas(
    State(state): State<AppState>,
    Query(query): Query<DeltaListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<DeltaResponse>>>, ServiceError> {
    let sign = match query.sign.as_deref() {
        Some(raw) => Some(
            DeltaSign::parse(raw)
                .ok_or_else(|| ServiceError::InvalidInput(format!("unknown sign filter: {}", raw)))?,
        ),
        None => None,
    };
    let filter = DeltaFilter {
        sign,
        cabinet_id: query.cabinet_id,
        item_code: query.item_code,
        recorded_from: query.recorded_from,
        recorded_to: query.recorded_to,
    };
    let limit = query.limit.clamp(1, state.config.api_max_page_size as u64);

    let (deltas, total) = state
        .services
        .ledger
        .list_deltas(filter, query.page, limit)
        .await?;
    let total_pages = (total + limit - 1) / limit;
    let items: Vec<DeltaResponse> = deltas.into_iter().map(Into::into).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit,
        total_pages,
    })))
}

/// Get a slot's on-hand quantity
#[utoipa::path(
    get,
    path = "/api/v1/ledger/on-hand/{cabinet_id}/{slot_no}",
    summary = "Get on-hand quantity",
    description = "Folds the slot's full delta history into its current quantity",
    params(
        ("cabinet_id" = String, Path, description = "Cabinet identifier"),
        ("slot_no" = i32, Path, description = "Slot number"),
    ),
    responses(
        (status = 200, description = "On-hand computed", body = ApiResponse<OnHandSummary>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_on_hand(
    State(state): State<AppState>,
    Path((cabinet_id, slot_no)): Path<(String, i32)>,
) -> Result<Json<ApiResponse<OnHandSummary>>, ServiceError> {
    let summary = state.services.ledger.on_hand(&cabinet_id, slot_no).await?;
    Ok(Json(ApiResponse::success(summary)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_request_requires_positive_qty() {
        let request = AppendDeltaRequest {
            cabinet_id: "CAB-3F".into(),
            slot_no: 4,
            item_code: "GAUZE-10".into(),
            sign: "take".into(),
            qty: 0,
            unit_id: None,
            actor_id: "nurse-12".into(),
            recorded_at: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn append_request_accepts_bare_sign_characters() {
        let raw = r#"{
            "cabinet_id": "CAB-3F",
            "slot_no": 4,
            "item_code": "GAUZE-10",
            "sign": "-",
            "qty": 2,
            "actor_id": "nurse-12"
        }"#;
        let request: AppendDeltaRequest = serde_json::from_str(raw).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(DeltaSign::parse(&request.sign), Some(DeltaSign::Take));
    }
}
