use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::service_account::ServiceAccountAuth;
use super::{check_response, SHEETS_API};
use crate::core::backend_error::BackendError;
use crate::core::delivery::{CellWrite, DataSource};
use crate::core::pipeline::{RunSettings, SettingsSource};
use crate::core::records::{CellValue, Grid};

/// Settings live in column C of the settings tab, every other row.
const SETTINGS_RANGE: &str = "C2:C8";
const TEMPLATE_ID_CELL: &str = "C2";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct ValueRangeWrite {
    range: String,
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateValues {
    value_input_option: &'static str,
    data: Vec<ValueRangeWrite>,
}

/// A1 sheet reference: always quoted, embedded quotes doubled.
fn quote_sheet(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

/// Zero-based column index to its A1 letters (0 → A, 26 → AA).
fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn cell_from_json(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::String(s) => CellValue::from(s.as_str()),
        Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Empty),
        Value::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        other => CellValue::Text(other.to_string()),
    }
}

fn cell_to_json(value: &CellValue) -> Value {
    match value {
        CellValue::Empty => Value::String(String::new()),
        CellValue::Number(n) => serde_json::json!(n),
        other => Value::String(other.to_string()),
    }
}

fn settings_from_rows(rows: &[Vec<Value>]) -> RunSettings {
    let at = |index: usize| {
        rows.get(index)
            .and_then(|row| row.first())
            .map(|value| cell_from_json(value).to_string().trim().to_string())
            .filter(|value| !value.is_empty())
    };

    RunSettings {
        template_id: at(0),
        email_subject: at(2),
        email_body: at(4),
        destination_folder: at(6),
    }
}

/// Reads and writes one spreadsheet: the responses tab as the data source and
/// the settings tab for per-run settings.
pub struct GoogleSheetsClient {
    client: Client,
    auth: Arc<ServiceAccountAuth>,
    spreadsheet_id: String,
    responses_sheet: String,
    settings_sheet: String,
}

impl GoogleSheetsClient {
    pub fn new(
        auth: Arc<ServiceAccountAuth>,
        spreadsheet_id: impl Into<String>,
        responses_sheet: impl Into<String>,
        settings_sheet: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            auth,
            spreadsheet_id: spreadsheet_id.into(),
            responses_sheet: responses_sheet.into(),
            settings_sheet: settings_sheet.into(),
        }
    }

    /// `{SHEETS_API}/spreadsheets/{id}/{segments...}` with each segment encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = Url::parse(&format!("{}/spreadsheets", SHEETS_API))
            .map_err(|e| BackendError::Api(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Api("sheets base URL cannot have a path".to_string()))?
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<Value>>, BackendError> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .get(self.url(&["values", range])?)
            .bearer_auth(&token)
            .query(&[
                ("valueRenderOption", "UNFORMATTED_VALUE"),
                ("dateTimeRenderOption", "FORMATTED_STRING"),
            ])
            .send()
            .await?;
        let range: ValueRange = check_response(response, "read values").await?.json().await?;
        Ok(range.values)
    }
}

#[async_trait]
impl DataSource for GoogleSheetsClient {
    async fn read_grid(&self) -> Result<Grid, BackendError> {
        let rows = self.get_values(&quote_sheet(&self.responses_sheet)).await?;
        tracing::debug!(sheet = %self.responses_sheet, rows = rows.len(), "Read sheet");

        Ok(Grid::new(
            rows.iter()
                .map(|row| row.iter().map(cell_from_json).collect())
                .collect(),
        ))
    }

    async fn read_row(&self, position: usize) -> Result<Option<Vec<CellValue>>, BackendError> {
        let range = format!("{}!{}:{}", quote_sheet(&self.responses_sheet), position, position);
        let rows = self.get_values(&range).await?;

        // The API drops empty rows, including rows past the end of the data.
        Ok(rows
            .into_iter()
            .next()
            .map(|row| row.iter().map(cell_from_json).collect()))
    }

    async fn write_cells(&self, position: usize, cells: &[CellWrite]) -> Result<(), BackendError> {
        if cells.is_empty() {
            return Ok(());
        }
        let token = self.auth.get_access_token().await?;
        let sheet = quote_sheet(&self.responses_sheet);

        let body = BatchUpdateValues {
            value_input_option: "USER_ENTERED",
            data: cells
                .iter()
                .map(|cell| ValueRangeWrite {
                    range: format!("{}!{}{}", sheet, column_letter(cell.column), position),
                    values: vec![vec![cell_to_json(&cell.value)]],
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.url(&["values:batchUpdate"])?)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        check_response(response, "write values").await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for GoogleSheetsClient {
    async fn load_settings(&self) -> Result<RunSettings, BackendError> {
        let range = format!("{}!{}", quote_sheet(&self.settings_sheet), SETTINGS_RANGE);
        let rows = self.get_values(&range).await?;
        Ok(settings_from_rows(&rows))
    }

    async fn store_template_id(&self, template_id: &str) -> Result<(), BackendError> {
        let token = self.auth.get_access_token().await?;
        let range = format!("{}!{}", quote_sheet(&self.settings_sheet), TEMPLATE_ID_CELL);

        let response = self
            .client
            .put(self.url(&["values", &range])?)
            .bearer_auth(&token)
            .query(&[("valueInputOption", "RAW")])
            .json(&ValueRangeWrite {
                range: range.clone(),
                values: vec![vec![Value::String(template_id.to_string())]],
            })
            .send()
            .await?;
        check_response(response, "store template id").await?;

        tracing::info!(sheet = %self.settings_sheet, template_id, "Stored template id");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_sheet() {
        assert_eq!(quote_sheet("Form Responses"), "'Form Responses'");
        assert_eq!(quote_sheet("Ann's"), "'Ann''s'");
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_cells_from_json() {
        assert_eq!(cell_from_json(&json!("Ann")), CellValue::from("Ann"));
        assert_eq!(cell_from_json(&json!("")), CellValue::Empty);
        assert_eq!(cell_from_json(&json!(42)), CellValue::Number(42.0));
        assert_eq!(cell_from_json(&json!(true)), CellValue::from("TRUE"));
        assert_eq!(cell_from_json(&Value::Null), CellValue::Empty);
    }

    #[test]
    fn test_cells_to_json() {
        assert_eq!(cell_to_json(&CellValue::from("Sent")), json!("Sent"));
        assert_eq!(cell_to_json(&CellValue::Number(3.5)), json!(3.5));
        assert_eq!(cell_to_json(&CellValue::Empty), json!(""));
    }

    #[test]
    fn test_settings_every_other_row() {
        let rows = vec![
            vec![json!(" tmpl-1 ")],
            vec![],
            vec![json!("Your NDA")],
            vec![],
            vec![json!("Please sign.\nThanks")],
            vec![],
            vec![json!("NDA PDFs")],
        ];

        let settings = settings_from_rows(&rows);
        assert_eq!(settings.template_id.as_deref(), Some("tmpl-1"));
        assert_eq!(settings.email_subject.as_deref(), Some("Your NDA"));
        assert_eq!(settings.email_body.as_deref(), Some("Please sign.\nThanks"));
        assert_eq!(settings.destination_folder.as_deref(), Some("NDA PDFs"));
    }

    #[test]
    fn test_missing_settings_are_none() {
        let settings = settings_from_rows(&[vec![json!("tmpl-1")]]);
        assert_eq!(settings.template_id.as_deref(), Some("tmpl-1"));
        assert_eq!(settings.email_subject, None);
        assert_eq!(settings.destination_folder, None);
    }
}
