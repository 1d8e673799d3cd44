//! Analysis reports: model, lifecycle status derivation and storage.

mod sqlite_store;
mod status;
mod store;
mod types;

pub use sqlite_store::SqliteReportStore;
pub use status::{derive_status, ReportStatus};
pub use store::{CreateReportRequest, ReportError, ReportFilter, ReportStore, StatusUpdate};
pub use types::{FailureInfo, Report, DISPATCH_ERROR_KIND, EXPIRED_KIND};
