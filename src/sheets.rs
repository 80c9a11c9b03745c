use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{SheetColumns, SheetsSettings, read_env};
use crate::domain::{ItemStatus, RowKey, Stage, StagingItem};
use crate::error::ArchiveError;
use crate::http::{build_client, error_body, send_with_retries};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerUpdate {
    pub status: ItemStatus,
    pub stage: Option<Stage>,
    pub archive_path: Option<String>,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// The staging spreadsheet: read in full at run start, written one row at a time.
pub trait StagingSheet: Send + Sync {
    fn fetch_items(&self) -> Result<Vec<StagingItem>, ArchiveError>;
    /// Writes every ledger cell of one row in a single request.
    fn write_row(&self, row: RowKey, update: &LedgerUpdate) -> Result<(), ArchiveError>;
}

#[derive(Debug, Clone)]
pub struct SheetLayout {
    headers: Vec<String>,
    index: HashMap<String, usize>,
    columns: SheetColumns,
}

impl SheetLayout {
    pub fn from_header(header: &[String], columns: SheetColumns) -> Result<Self, ArchiveError> {
        let headers: Vec<String> = header.iter().map(|name| name.trim().to_string()).collect();
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(idx, name)| (name.to_lowercase(), idx))
            .collect();
        let layout = Self {
            headers,
            index,
            columns,
        };
        for required in [
            &layout.columns.file,
            &layout.columns.status,
            &layout.columns.stage,
            &layout.columns.archive_path,
            &layout.columns.url,
            &layout.columns.error,
        ] {
            layout.column(required)?;
        }
        Ok(layout)
    }

    pub fn column(&self, name: &str) -> Result<usize, ArchiveError> {
        self.index.get(&name.to_lowercase()).copied().ok_or_else(|| {
            ArchiveError::ConfigParse(format!("column {name:?} missing from staging sheet header"))
        })
    }

    /// `None` for blank rows and rows whose status cannot be read.
    pub fn item_from_row(&self, row: RowKey, values: &[String]) -> Option<StagingItem> {
        if values.iter().all(|value| value.trim().is_empty()) {
            return None;
        }
        let mut item = StagingItem::new(row);
        for (idx, header) in self.headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = values.get(idx).map(|v| v.trim()).unwrap_or_default();
            item.fields.insert(header.clone(), value.to_string());
        }

        let cell = |name: &str| {
            self.column(name)
                .ok()
                .and_then(|idx| values.get(idx))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        item.status = match cell(&self.columns.status).unwrap_or_default().parse() {
            Ok(status) => status,
            Err(err) => {
                warn!(%row, error = %err, "skipping row with unreadable status");
                return None;
            }
        };
        item.stage = cell(&self.columns.stage).and_then(|stage| stage.parse().ok());
        item.source = cell(&self.columns.file);
        item.archive_path = cell(&self.columns.archive_path);
        item.url = cell(&self.columns.url);
        item.last_error = cell(&self.columns.error);
        Some(item)
    }

    pub fn ledger_cells(&self, update: &LedgerUpdate) -> Result<Vec<(usize, String)>, ArchiveError> {
        Ok(vec![
            (self.column(&self.columns.status)?, update.status.to_string()),
            (
                self.column(&self.columns.stage)?,
                update.stage.map(|stage| stage.to_string()).unwrap_or_default(),
            ),
            (
                self.column(&self.columns.archive_path)?,
                update.archive_path.clone().unwrap_or_default(),
            ),
            (
                self.column(&self.columns.url)?,
                update.url.clone().unwrap_or_default(),
            ),
            (
                self.column(&self.columns.error)?,
                update.error.clone().unwrap_or_default(),
            ),
        ])
    }
}

pub fn parse_rows(
    rows: &[Vec<String>],
    columns: SheetColumns,
) -> Result<(SheetLayout, Vec<StagingItem>), ArchiveError> {
    let Some((header, data)) = rows.split_first() else {
        return Err(ArchiveError::ConfigParse("staging sheet has no header row".to_string()));
    };
    let layout = SheetLayout::from_header(header, columns)?;
    let items = data
        .iter()
        .enumerate()
        .filter_map(|(idx, values)| layout.item_from_row(RowKey(idx as u32 + 2), values))
        .collect();
    Ok((layout, items))
}

/// Zero-based column index to A1 letters.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn quoted_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest {
    value_input_option: &'static str,
    data: Vec<ValueRange>,
}

#[derive(Debug, Serialize)]
struct ValueRange {
    range: String,
    values: Vec<Vec<String>>,
}

pub struct SheetsHttpClient {
    client: Client,
    token: String,
    spreadsheet_id: String,
    sheet_name: String,
    columns: SheetColumns,
    layout: Mutex<Option<SheetLayout>>,
}

impl SheetsHttpClient {
    pub fn new(settings: &SheetsSettings) -> Result<Self, ArchiveError> {
        let client = build_client(Duration::from_secs(60), ArchiveError::SheetsHttp)?;
        Ok(Self {
            client,
            token: read_env(&settings.access_token_env)?,
            spreadsheet_id: settings.spreadsheet_id.clone(),
            sheet_name: settings.sheet_name.clone(),
            columns: settings.columns.clone(),
            layout: Mutex::new(None),
        })
    }

    fn spreadsheet_url(&self, tail: &[&str]) -> Result<Url, ArchiveError> {
        let mut url = Url::parse(SHEETS_API).map_err(|err| ArchiveError::SheetsHttp(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ArchiveError::SheetsHttp("invalid Sheets API base URL".to_string()))?
            .push(&self.spreadsheet_id)
            .extend(tail);
        Ok(url)
    }

    fn fetch_rows(&self) -> Result<Vec<Vec<String>>, ArchiveError> {
        let range = quoted_sheet(&self.sheet_name);
        let url = self.spreadsheet_url(&["values", range.as_str()])?;
        let response = send_with_retries(
            || Ok(self.client.get(url.clone()).bearer_auth(&self.token)),
            ArchiveError::SheetsHttp,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_body(response, "Sheets request failed");
            return Err(ArchiveError::SheetsStatus { status, message });
        }
        let body: ValuesResponse = response
            .json()
            .map_err(|err| ArchiveError::SheetsHttp(err.to_string()))?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

impl StagingSheet for SheetsHttpClient {
    fn fetch_items(&self) -> Result<Vec<StagingItem>, ArchiveError> {
        let rows = self.fetch_rows()?;
        let (layout, items) = parse_rows(&rows, self.columns.clone())?;
        debug!(rows = rows.len(), items = items.len(), "staging sheet read");
        let mut guard = self
            .layout
            .lock()
            .map_err(|_| ArchiveError::SheetsHttp("layout lock poisoned".to_string()))?;
        *guard = Some(layout);
        Ok(items)
    }

    fn write_row(&self, row: RowKey, update: &LedgerUpdate) -> Result<(), ArchiveError> {
        let cells = {
            let guard = self
                .layout
                .lock()
                .map_err(|_| ArchiveError::Ledger("layout lock poisoned".to_string()))?;
            let layout = guard
                .as_ref()
                .ok_or_else(|| ArchiveError::Ledger("sheet layout not loaded".to_string()))?;
            layout.ledger_cells(update)?
        };
        let sheet = quoted_sheet(&self.sheet_name);
        let body = BatchUpdateRequest {
            value_input_option: "RAW",
            data: cells
                .into_iter()
                .map(|(idx, value)| ValueRange {
                    range: format!("{sheet}!{}{}", column_letter(idx), row.0),
                    values: vec![vec![value]],
                })
                .collect(),
        };

        let mut url = self.spreadsheet_url(&[])?;
        url.path_segments_mut()
            .map_err(|_| ArchiveError::Ledger("invalid Sheets API URL".to_string()))?
            .push("values:batchUpdate");
        let response = send_with_retries(
            || Ok(self.client.post(url.clone()).bearer_auth(&self.token).json(&body)),
            ArchiveError::Ledger,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_body(response, "Sheets update failed");
            return Err(ArchiveError::Ledger(format!("status {status}: {message}")));
        }
        Ok(())
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
