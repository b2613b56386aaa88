pub mod claim_exception;
pub mod comparison_row;
pub mod dispense_unit;
pub mod item_master;
pub mod return_claim;
pub mod reversal;
pub mod slot_delta;
pub mod usage_claim;

pub use claim_exception::{ClaimKind, ExceptionReason};
pub use comparison_row::ComparisonStatus;
pub use dispense_unit::ItemStatus;
pub use return_claim::ReturnReason;
pub use usage_claim::ClaimOutcome;
