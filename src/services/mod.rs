// Write path: ledger appends and claim ingestion
pub mod ledger;
pub mod reconciliation;

// Read path: dashboard and report projections
pub mod reporting;

pub use ledger::LedgerService;
pub use reconciliation::ReconciliationService;
pub use reporting::ReportingService;
