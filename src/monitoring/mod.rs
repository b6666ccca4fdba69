pub mod database;
pub mod notifier;
pub mod records;
pub mod reporter;
pub mod scan_store;
pub mod vendor_ledger;

pub use database::MonitorDatabase;
pub use notifier::{NotificationDispatch, WebhookNotifier};
pub use records::{
    ScanRecord, VendorRecord, Violation, ViolationFilter, ViolationRecord, ViolationStatus,
};
pub use reporter::{MonitoringSummary, ViolationReporter};
pub use scan_store::ScanStore;
pub use vendor_ledger::VendorLedger;
