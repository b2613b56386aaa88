pub mod claims;
pub mod ledger;
pub mod reconciliation;

use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub ledger: Arc<crate::services::ledger::LedgerService>,
    pub reconciliation: Arc<crate::services::reconciliation::ReconciliationService>,
    pub reporting: Arc<crate::services::reporting::ReportingService>,
}

impl AppServices {
    /// Build the AppServices container shared by every handler.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &crate::config::AppConfig,
    ) -> Self {
        let ledger = Arc::new(crate::services::ledger::LedgerService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let reconciliation = Arc::new(crate::services::reconciliation::ReconciliationService::new(
            db_pool.clone(),
            event_sender,
            config.claim_match_lookback_hours,
        ));
        let reporting = Arc::new(crate::services::reporting::ReportingService::new(db_pool));

        Self {
            ledger,
            reconciliation,
            reporting,
        }
    }
}
