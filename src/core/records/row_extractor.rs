use super::record_models::{CellValue, Grid, Record};
use indexmap::IndexMap;

/// Number of header rows above the data in every grid we read.
pub const HEADER_ROWS: usize = 1;

/// Turns a grid into one record per data row, in row order.
///
/// Short rows are padded with empty cells so every record carries the full
/// header; extra cells past the header width are ignored.
pub fn extract_records(grid: &Grid) -> Vec<Record> {
    let header = grid.header();

    grid.rows
        .iter()
        .skip(HEADER_ROWS)
        .enumerate()
        .map(|(offset, row)| {
            let fields: IndexMap<String, CellValue> = header
                .iter()
                .enumerate()
                .map(|(col, name)| {
                    let value = row.get(col).cloned().unwrap_or(CellValue::Empty);
                    (name.clone(), value)
                })
                .collect();

            Record {
                source_position: offset + 1 + HEADER_ROWS,
                fields,
            }
        })
        .collect()
}
