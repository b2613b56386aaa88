use crate::entities::{comparison_row, ClaimOutcome};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

pub mod record_return_command;
pub mod record_reversal_command;
pub mod record_usage_command;

/// Attempts at a tally update before a version conflict is surfaced.
pub(crate) const MAX_TALLY_RETRIES: u32 = 3;

pub(crate) async fn send_event(
    event_sender: &EventSender,
    event: Event,
) -> Result<(), ServiceError> {
    event_sender.send(event).await.map_err(|e| {
        let msg = format!("failed to send claim event: {}", e);
        error!("{}", msg);
        ServiceError::EventError(msg)
    })
}

/// What one claim ingestion did, echoed back to the caller. The stored claim
/// row keeps the outcome of its first processing; replays answer with
/// `DUPLICATE` here while the row stays untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimIngestResult {
    pub claim_id: Uuid,
    pub outcome: ClaimOutcome,
    pub item_code: String,
    pub qty: i32,
    pub claim_window: NaiveDate,
    /// Units whose tallies absorbed quantity, in application order.
    pub applied_unit_ids: Vec<String>,
    /// Exceptions filed while processing, empty on a clean application.
    pub exception_ids: Vec<Uuid>,
    /// The window's comparison row after this claim was folded in. Absent
    /// only on a replay whose window has since been trimmed.
    pub comparison: Option<comparison_row::Model>,
}
