use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::fmt;

/// A single cell as the data source hands it over.
///
/// The pipeline never coerces between variants; it only needs the string form
/// when a value is substituted into a document or compared against a status.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(text) => f.write_str(text),
            // f64's Display already drops the ".0" on whole numbers
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Date(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::from(value.as_str())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Header row plus data rows, exactly as read from the data source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    pub rows: Vec<Vec<CellValue>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    /// Header names, in column order. An empty grid has no header.
    pub fn header(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .unwrap_or_default()
    }
}

/// One data row keyed by header name.
///
/// `source_position` is the 1-based sheet row the record came from and is only
/// ever used to write the outcome back to the same row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub source_position: usize,
    pub fields: IndexMap<String, CellValue>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&CellValue> {
        self.fields.get(field)
    }

    /// String form of a field, or an empty string when it is absent.
    pub fn text(&self, field: &str) -> String {
        self.fields
            .get(field)
            .map(|value| value.to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_cell_display_forms() {
        assert_eq!(CellValue::Empty.to_string(), "");
        assert_eq!(CellValue::Text("Ann".into()).to_string(), "Ann");
        assert_eq!(CellValue::Number(42.0).to_string(), "42");
        assert_eq!(CellValue::Number(2.5).to_string(), "2.5");

        let date = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(CellValue::Date(date).to_string(), "2024-03-09 14:05:00");
    }

    #[test]
    fn test_whitespace_text_counts_as_empty() {
        assert!(CellValue::Text("   ".into()).is_empty());
        assert!(CellValue::from("").is_empty());
        assert!(!CellValue::Number(0.0).is_empty());
    }
}
