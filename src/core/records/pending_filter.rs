use super::record_models::Record;

/// Status value that marks a row as fully processed.
///
/// Compared case-insensitively so rows marked "sent" by hand are not re-sent.
pub const SENT_MARKER: &str = "Sent";

/// Status value the history store uses for records that did not complete.
pub const FAILED_MARKER: &str = "Failed";

/// Returns true when the status field is absent, blank, or anything but the
/// terminal marker.
pub fn is_pending(record: &Record, status_field: &str) -> bool {
    match record.get(status_field) {
        None => true,
        Some(value) if value.is_empty() => true,
        Some(value) => !value.to_string().trim().eq_ignore_ascii_case(SENT_MARKER),
    }
}

/// Keeps records that still need processing and drops the bookkeeping columns
/// from them, so nothing the pipeline writes back can leak into a document.
pub fn filter_pending(records: Vec<Record>, status_field: &str, output_fields: &[&str]) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| is_pending(record, status_field))
        .map(|mut record| {
            record.fields.shift_remove(status_field);
            for field in output_fields {
                record.fields.shift_remove(*field);
            }
            record
        })
        .collect()
}
