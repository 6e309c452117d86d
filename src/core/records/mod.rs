pub mod pending_filter;
pub mod record_models;
pub mod row_extractor;

pub use pending_filter::{filter_pending, FAILED_MARKER, SENT_MARKER};
pub use record_models::{CellValue, Grid, Record};
pub use row_extractor::extract_records;
