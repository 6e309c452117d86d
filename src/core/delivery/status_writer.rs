use crate::core::backend_error::BackendError;
use crate::core::records::{CellValue, Grid, Record};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

/// One cell to write in a row. `column` is zero-based.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub column: usize,
    pub value: CellValue,
}

/// The tabular data source the pipeline reads from and writes outcomes to.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Reads the whole sheet: header row first.
    async fn read_grid(&self) -> Result<Grid, BackendError>;

    /// Reads one row by 1-based position, `None` if the sheet is shorter.
    async fn read_row(&self, position: usize) -> Result<Option<Vec<CellValue>>, BackendError>;

    /// Writes all cells of one row in a single call.
    async fn write_cells(&self, position: usize, cells: &[CellWrite]) -> Result<(), BackendError>;
}

/// Header names of the columns the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    pub full_name: String,
    pub email: String,
    pub status: String,
    pub link: Option<String>,
    pub timestamp: Option<String>,
}

impl ColumnNames {
    /// Columns that only the pipeline writes and that never reach a document.
    pub fn output_only(&self) -> Vec<&str> {
        let mut fields = vec![self.status.as_str()];
        fields.extend(self.link.as_deref());
        fields.extend(self.timestamp.as_deref());
        fields
    }
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            full_name: "Full Name".to_string(),
            email: "Email Address".to_string(),
            status: "NDA Status".to_string(),
            link: Some("NDA Link PDF".to_string()),
            timestamp: None,
        }
    }
}

/// Zero-based column positions resolved from the header once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub full_name: usize,
    pub email: usize,
    pub status: usize,
    pub link: Option<usize>,
    pub timestamp: Option<usize>,
}

impl ColumnMap {
    /// Looks every configured column up by exact, case-sensitive name.
    /// Returns the first missing name on failure.
    pub fn resolve(header: &[String], names: &ColumnNames) -> Result<Self, String> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| name.to_string())
        };
        let find_optional = |name: &Option<String>| name.as_deref().map(find).transpose();

        Ok(Self {
            full_name: find(&names.full_name)?,
            email: find(&names.email)?,
            status: find(&names.status)?,
            link: find_optional(&names.link)?,
            timestamp: find_optional(&names.timestamp)?,
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WriteBackError {
    #[error("row {0} no longer exists in the data source")]
    RowMissing(usize),
    #[error("row {position} changed since it was read (expected '{expected}', found '{found}')")]
    RowChanged {
        position: usize,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Writes outcomes back to the rows records came from.
pub struct StatusWriter<'a, S: DataSource> {
    source: &'a S,
    columns: ColumnMap,
}

impl<'a, S: DataSource> StatusWriter<'a, S> {
    pub fn new(source: &'a S, columns: ColumnMap) -> Self {
        Self { source, columns }
    }

    /// Writes status, and link/timestamp when those columns are configured.
    ///
    /// The target row is re-read first; if its email cell no longer matches
    /// the record the write is refused.
    pub async fn write(
        &self,
        record: &Record,
        email: &str,
        status: &str,
        link: Option<&str>,
        written_at: NaiveDateTime,
    ) -> Result<(), WriteBackError> {
        let position = record.source_position;
        let row = self
            .source
            .read_row(position)
            .await?
            .ok_or(WriteBackError::RowMissing(position))?;

        let found = row
            .get(self.columns.email)
            .map(|cell| cell.to_string())
            .unwrap_or_default();
        if found.trim() != email.trim() {
            return Err(WriteBackError::RowChanged {
                position,
                expected: email.to_string(),
                found,
            });
        }

        let mut cells = vec![CellWrite {
            column: self.columns.status,
            value: CellValue::from(status),
        }];
        if let (Some(column), Some(link)) = (self.columns.link, link) {
            cells.push(CellWrite {
                column,
                value: CellValue::from(link),
            });
        }
        if let Some(column) = self.columns.timestamp {
            cells.push(CellWrite {
                column,
                value: CellValue::Date(written_at),
            });
        }

        self.source.write_cells(position, &cells).await?;
        tracing::debug!(source_position = position, status, "Status written back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::records::extract_records;
    use crate::infra::memory::InMemorySheet;
    use chrono::Local;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_resolve_columns_by_name() {
        let names = ColumnNames::default();
        let map = ColumnMap::resolve(
            &header(&["Timestamp", "Email Address", "Full Name", "NDA Status", "NDA Link PDF"]),
            &names,
        )
        .unwrap();

        assert_eq!(map.email, 1);
        assert_eq!(map.full_name, 2);
        assert_eq!(map.status, 3);
        assert_eq!(map.link, Some(4));
        assert_eq!(map.timestamp, None);
    }

    #[test]
    fn test_missing_column_is_reported_by_name() {
        let names = ColumnNames::default();
        let err = ColumnMap::resolve(&header(&["Full Name", "Email Address", "nda status"]), &names)
            .unwrap_err();
        assert_eq!(err, "NDA Status");
    }

    #[test]
    fn test_output_only_columns() {
        let names = ColumnNames {
            timestamp: Some("Sent At".to_string()),
            ..ColumnNames::default()
        };
        assert_eq!(names.output_only(), vec!["NDA Status", "NDA Link PDF", "Sent At"]);
    }

    #[tokio::test]
    async fn test_write_lands_on_the_source_row() {
        let sheet = InMemorySheet::from_rows(&[
            &["Full Name", "Email Address", "NDA Status", "NDA Link PDF"],
            &["Ann Lee", "ann@example.com", "", ""],
            &["Bo Chen", "bo@example.com", "", ""],
        ]);
        let grid = sheet.read_grid().await.unwrap();
        let map = ColumnMap::resolve(&grid.header(), &ColumnNames::default()).unwrap();
        let records = extract_records(&grid);

        let writer = StatusWriter::new(&sheet, map);
        writer
            .write(
                &records[1],
                "bo@example.com",
                "Sent",
                Some("https://drive.example/bo"),
                Local::now().naive_local(),
            )
            .await
            .unwrap();

        assert_eq!(sheet.cell(3, 2), CellValue::from("Sent"));
        assert_eq!(sheet.cell(3, 3), CellValue::from("https://drive.example/bo"));
        assert_eq!(sheet.cell(2, 2), CellValue::Empty);
    }

    #[tokio::test]
    async fn test_write_refuses_shifted_rows() {
        let sheet = InMemorySheet::from_rows(&[
            &["Full Name", "Email Address", "NDA Status"],
            &["Ann Lee", "ann@example.com", ""],
            &["Bo Chen", "bo@example.com", ""],
        ]);
        let grid = sheet.read_grid().await.unwrap();
        let names = ColumnNames {
            link: None,
            ..ColumnNames::default()
        };
        let map = ColumnMap::resolve(&grid.header(), &names).unwrap();
        let records = extract_records(&grid);

        // Someone deletes Ann's row mid-run.
        sheet.delete_row(2);

        let writer = StatusWriter::new(&sheet, map);
        let now = Local::now().naive_local();

        let err = writer
            .write(&records[0], "ann@example.com", "Sent", None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, WriteBackError::RowChanged { position: 2, .. }));

        let err = writer
            .write(&records[1], "bo@example.com", "Sent", None, now)
            .await
            .unwrap_err();
        assert_eq!(err, WriteBackError::RowMissing(3));
        assert_eq!(sheet.cell(2, 2), CellValue::Empty);
    }
}
