use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MedCab Reconciliation API",
        version = "1.0.0",
        description = r#"
# MedCab Dispense/Usage/Return Reconciliation API

An API for reconciling what smart medical-supply cabinets dispense against
what clinical systems report as used or returned.

## Features

- **Slot Ledger**: Append-only signed movement log per cabinet slot; on-hand is always folded from history
- **Dispense Units**: Per-piece tracking of takes with running used/returned/pending tallies
- **Claim Ingestion**: Idempotent usage and return claims matched FIFO or by unit id
- **Exception Worklist**: Every refused or flagged quantity recorded for follow-up
- **Daily Comparisons**: Per-item, per-day dispensed vs used vs returned rows with discrepancy status
- **Reversals**: Window-level corrections for over-counted usage or returns

## Error Handling

The API uses consistent error response formats with appropriate HTTP status codes:

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "Validation failed",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

List endpoints support pagination with the following query parameters:
- `page`: Page number (default: 1)
- `limit`: Items per page (default: 20, max: 100)
        "#,
        contact(
            name = "MedCab Platform Team",
            email = "platform@medcab.example"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Ledger", description = "Slot movement ledger endpoints"),
        (name = "Claims", description = "Usage, return and reversal ingestion endpoints"),
        (name = "Comparisons", description = "Dispense-vs-usage comparison endpoints"),
        (name = "Units", description = "Dispense unit endpoints"),
        (name = "Exceptions", description = "Claim exception worklist endpoints"),
        (name = "Admin", description = "Administrative endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Ledger
        crate::handlers::ledger::append_delta,
        crate::handlers::ledger::list_deltas,
        crate::handlers::ledger::get_on_hand,

        // Claims
        crate::handlers::claims::record_usage,
        crate::handlers::claims::record_return,
        crate::handlers::claims::record_reversal,

        // Comparisons
        crate::handlers::reconciliation::list_comparisons,
        crate::handlers::reconciliation::get_summary,
        crate::handlers::reconciliation::get_comparison,

        // Units
        crate::handlers::reconciliation::list_units,
        crate::handlers::reconciliation::get_unit,

        // Exceptions
        crate::handlers::reconciliation::list_exceptions,
        crate::handlers::reconciliation::resolve_exception,

        // Admin
        crate::handlers::reconciliation::rebuild_windows,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Ledger types
            crate::handlers::ledger::AppendDeltaRequest,
            crate::handlers::ledger::AppendDeltaResponse,
            crate::handlers::ledger::DeltaResponse,
            crate::services::ledger::OnHandSummary,
            crate::services::ledger::DeltaSign,

            // Claim types
            crate::handlers::claims::RecordUsageRequest,
            crate::handlers::claims::RecordReturnRequest,
            crate::handlers::claims::RecordReversalRequest,
            crate::handlers::claims::ClaimIngestResponse,
            crate::handlers::claims::UsageClaimResponse,
            crate::handlers::claims::ReturnClaimResponse,
            crate::handlers::claims::ReversalResponse,

            // Comparison and unit types
            crate::handlers::reconciliation::ComparisonRowResponse,
            crate::handlers::reconciliation::UnitResponse,
            crate::handlers::reconciliation::ExceptionResponse,
            crate::handlers::reconciliation::ComparisonDetailResponse,
            crate::handlers::reconciliation::UnitDetailResponse,
            crate::handlers::reconciliation::ResolveExceptionResponse,
            crate::handlers::reconciliation::RebuildWindowsRequest,
            crate::handlers::reconciliation::RebuildWindowsResponse,
            crate::services::reporting::ReconciliationSummary,
            crate::services::reporting::StatusCount,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_includes_core_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("MedCab Reconciliation API"));
        assert!(json.contains("/api/v1/ledger/deltas"));
        assert!(json.contains("/api/v1/claims/usage"));
        assert!(json.contains("/api/v1/comparisons/summary"));
    }
}
