pub mod loan_status_sync;
pub mod reconciliation_sync;
