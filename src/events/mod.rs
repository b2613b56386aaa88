use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::{ClaimKind, ComparisonStatus, ExceptionReason, ItemStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    DeltaAppended {
        delta_id: Uuid,
        cabinet_id: String,
        slot_no: i32,
        item_code: String,
        delta_qty: i32,
    },
    DeltaRejected {
        cabinet_id: String,
        slot_no: i32,
        item_code: String,
        reason: String,
    },
    UnitDispensed {
        unit_id: String,
        item_code: String,
        qty: i32,
    },

    // Claim events
    UsageApplied {
        claim_id: Uuid,
        item_code: String,
        qty: i32,
        unit_ids: Vec<String>,
    },
    ReturnApplied {
        claim_id: Uuid,
        item_code: String,
        qty: i32,
        unit_ids: Vec<String>,
    },
    ClaimRejected {
        claim_id: Uuid,
        kind: ClaimKind,
        item_code: String,
        reason: String,
    },
    ClaimDuplicate {
        claim_id: Uuid,
        kind: ClaimKind,
    },
    UnitStatusChanged {
        unit_id: String,
        old_status: ItemStatus,
        new_status: ItemStatus,
    },

    // Exception and correction events
    ExceptionFiled {
        exception_id: Uuid,
        reason: ExceptionReason,
        item_code: String,
        qty: i32,
    },
    ExceptionResolved(Uuid),
    ReversalFiled {
        reversal_id: Uuid,
        kind: ClaimKind,
        item_code: String,
        window: NaiveDate,
        qty: i32,
    },

    // Reporting events
    ComparisonRecomputed {
        item_code: String,
        window: NaiveDate,
        status: ComparisonStatus,
    },
    WindowsRebuilt {
        from: NaiveDate,
        to: NaiveDate,
        rows: u64,
    },
}

/// Consumes the event stream, keeping business metrics and the log current.
/// Runs for the lifetime of the channel; exits when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::DeltaAppended {
                cabinet_id,
                slot_no,
                item_code,
                delta_qty,
                ..
            } => {
                crate::metrics::BUSINESS_METRICS.deltas_appended.inc();
                info!(
                    cabinet_id = %cabinet_id,
                    slot_no = slot_no,
                    item_code = %item_code,
                    delta_qty = delta_qty,
                    "slot delta appended"
                );
            }
            Event::DeltaRejected {
                cabinet_id,
                slot_no,
                reason,
                ..
            } => {
                crate::metrics::BUSINESS_METRICS.deltas_rejected.inc();
                warn!(
                    cabinet_id = %cabinet_id,
                    slot_no = slot_no,
                    reason = %reason,
                    "slot delta rejected"
                );
            }
            Event::UnitDispensed {
                unit_id,
                item_code,
                qty,
            } => {
                crate::metrics::BUSINESS_METRICS.units_dispensed.inc();
                info!(unit_id = %unit_id, item_code = %item_code, qty = qty, "dispense unit opened");
            }
            Event::UsageApplied {
                claim_id,
                item_code,
                qty,
                ..
            } => {
                crate::metrics::BUSINESS_METRICS.claims_applied.inc();
                info!(claim_id = %claim_id, item_code = %item_code, qty = qty, "usage claim applied");
            }
            Event::ReturnApplied {
                claim_id,
                item_code,
                qty,
                ..
            } => {
                crate::metrics::BUSINESS_METRICS.claims_applied.inc();
                info!(claim_id = %claim_id, item_code = %item_code, qty = qty, "return claim applied");
            }
            Event::ClaimRejected {
                claim_id,
                kind,
                item_code,
                reason,
            } => {
                crate::metrics::BUSINESS_METRICS.claims_rejected.inc();
                warn!(
                    claim_id = %claim_id,
                    kind = %kind,
                    item_code = %item_code,
                    reason = %reason,
                    "claim rejected"
                );
            }
            Event::ClaimDuplicate { claim_id, kind } => {
                crate::metrics::BUSINESS_METRICS.claims_duplicate.inc();
                info!(claim_id = %claim_id, kind = %kind, "duplicate claim replay");
            }
            Event::UnitStatusChanged {
                unit_id,
                old_status,
                new_status,
            } => {
                info!(
                    unit_id = %unit_id,
                    old_status = %old_status,
                    new_status = %new_status,
                    "unit status advanced"
                );
            }
            Event::ExceptionFiled {
                exception_id,
                reason,
                item_code,
                qty,
            } => {
                crate::metrics::BUSINESS_METRICS.exceptions_filed.inc();
                warn!(
                    exception_id = %exception_id,
                    reason = %reason,
                    item_code = %item_code,
                    qty = qty,
                    "claim exception filed"
                );
            }
            Event::ExceptionResolved(exception_id) => {
                info!(exception_id = %exception_id, "claim exception resolved");
            }
            Event::ReversalFiled {
                reversal_id,
                kind,
                item_code,
                window,
                qty,
            } => {
                crate::metrics::BUSINESS_METRICS.reversals_filed.inc();
                info!(
                    reversal_id = %reversal_id,
                    kind = %kind,
                    item_code = %item_code,
                    window = %window,
                    qty = qty,
                    "reversal filed"
                );
            }
            Event::ComparisonRecomputed {
                item_code,
                window,
                status,
            } => {
                // Counted at the recompute site, only logged here
                info!(
                    item_code = %item_code,
                    window = %window,
                    status = %status,
                    "comparison row recomputed"
                );
            }
            Event::WindowsRebuilt { from, to, rows } => {
                info!(from = %from, to = %to, rows = rows, "comparison windows rebuilt");
            }
        }

        if let Err(e) = persist_event_log(&event) {
            error!("Failed to serialize event for the audit log: {}", e);
        }
    }

    info!("Event processing loop stopped");
}

// Audit log is the tracing pipeline; events serialize into the debug target
// so a JSON sink can pick them up without a second writer.
fn persist_event_log(event: &Event) -> Result<(), serde_json::Error> {
    let payload = serde_json::to_string(event)?;
    tracing::debug!(target: "medcab_api::audit", event = %payload, "event recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event_to_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender
            .send(Event::ExceptionResolved(Uuid::nil()))
            .await
            .unwrap();

        match rx.recv().await {
            Some(Event::ExceptionResolved(id)) => assert_eq!(id, Uuid::nil()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::ExceptionResolved(Uuid::nil())).await;
        assert!(result.is_err());
    }

    #[test]
    fn events_serialize_for_audit_log() {
        let event = Event::ComparisonRecomputed {
            item_code: "SYR-10ML".into(),
            window: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            status: ComparisonStatus::Matched,
        };
        let payload = serde_json::to_string(&event).unwrap();
        assert!(payload.contains("SYR-10ML"));
        assert!(payload.contains("MATCHED"));
    }
}
