//! Spreadsheet source
//!
//! Rows are read from an A1 range (for example `Enrollments!A2:G`); the
//! mapping's entry order is the column order of that range. One mapped
//! column holds the status marker. Only rows marked `pending` are processed
//! and each one gets a terminal marker written back after the run.
//!
//! Feedback is sent in chunks with a pause between requests to stay under
//! the API's write quota.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{json_cell, ColumnMapping, ExtractError, RawRow, RowCache, RowSource, StatusUpdate};
use crate::retry::{retry, RetryPolicy};

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_RANGE: &str = "Enrollments!A2:G";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FEEDBACK_BATCH_SIZE: usize = 50;
pub const DEFAULT_FEEDBACK_DELAY_MS: u64 = 1000;

/// Values for one A1 range, written in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeUpdate {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

/// Remote spreadsheet operations
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Read a range; blank trailing cells may be absent from a row
    async fn read(&self, range: &str) -> Result<Vec<Vec<Option<String>>>, ExtractError>;

    async fn write(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), ExtractError>;

    async fn write_batch(&self, updates: Vec<RangeUpdate>) -> Result<(), ExtractError>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Google Sheets v4 REST client
pub struct HttpSheetClient {
    http: Client,
    api_base: String,
    spreadsheet_id: String,
    access_token: Option<String>,
    retry: RetryPolicy,
}

impl HttpSheetClient {
    pub fn new(
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ExtractError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_base: api_base.into(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token,
            retry,
        })
    }

    fn url(&self, tail: &[&str]) -> Result<Url, ExtractError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ExtractError::Shape(format!("invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ExtractError::Shape("API base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .extend(tail);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, ExtractError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExtractError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_once(&self, range: &str) -> Result<Vec<Vec<Option<String>>>, ExtractError> {
        let url = self.url(&["values", range])?;
        let response = self.authorize(self.http.get(url)).send().await?;
        let body: ValueRange = Self::check(response).await?.json().await?;

        Ok(body
            .values
            .iter()
            .map(|row| row.iter().map(json_cell).collect())
            .collect())
    }

    async fn write_once(&self, range: &str, values: &[Vec<String>]) -> Result<(), ExtractError> {
        let mut url = self.url(&["values", range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        let response = self.authorize(self.http.put(url)).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn write_batch_once(&self, updates: &[RangeUpdate]) -> Result<(), ExtractError> {
        let url = self.url(&["values:batchUpdate"])?;
        let data: Vec<_> = updates
            .iter()
            .map(|u| json!({ "range": u.range, "values": u.values }))
            .collect();

        let body = json!({ "valueInputOption": "RAW", "data": data });
        let response = self.authorize(self.http.post(url)).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SheetClient for HttpSheetClient {
    async fn read(&self, range: &str) -> Result<Vec<Vec<Option<String>>>, ExtractError> {
        retry(&self.retry, "sheets.read", ExtractError::is_transient, move || {
            self.read_once(range)
        })
        .await
    }

    async fn write(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), ExtractError> {
        let values = &values;
        retry(&self.retry, "sheets.write", ExtractError::is_transient, move || {
            self.write_once(range, values)
        })
        .await
    }

    async fn write_batch(&self, updates: Vec<RangeUpdate>) -> Result<(), ExtractError> {
        let updates = &updates;
        retry(
            &self.retry,
            "sheets.batch_update",
            ExtractError::is_transient,
            move || self.write_batch_once(updates),
        )
        .await
    }
}

/// A parsed A1 range such as `Enrollments!A2:G`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    raw: String,
    /// Sheet name as written, including quotes if any
    pub sheet: String,
    /// 0-based index of the first column
    pub start_column: usize,
    /// 1-based spreadsheet row of the first value row
    pub start_row: usize,
}

impl SheetRange {
    pub fn parse(raw: &str) -> Result<Self, ExtractError> {
        let invalid = || ExtractError::Shape(format!("invalid A1 range '{}'", raw));

        let (sheet, cells) = raw.rsplit_once('!').ok_or_else(invalid)?;
        let start = cells.split(':').next().unwrap_or(cells);
        let letters: String = start.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let digits = &start[letters.len()..];

        if sheet.is_empty() || letters.is_empty() {
            return Err(invalid());
        }
        let start_row = if digits.is_empty() {
            1
        } else {
            digits.parse::<usize>().map_err(|_| invalid())?
        };

        Ok(Self {
            raw: raw.to_string(),
            sheet: sheet.to_string(),
            start_column: column_index(&letters),
            start_row,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A1 reference to one cell of this sheet
    pub fn cell(&self, column: usize, row: usize) -> String {
        format!("{}!{}{}", self.sheet, column_letters(column), row)
    }
}

/// `A` -> 0, `Z` -> 25, `AA` -> 26
fn column_index(letters: &str) -> usize {
    letters
        .chars()
        .map(|c| (c.to_ascii_uppercase() as usize) - ('A' as usize) + 1)
        .fold(0, |acc, d| acc * 26 + d)
        .saturating_sub(1)
}

/// 0 -> `A`, 25 -> `Z`, 26 -> `AA`
fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Chunking and pacing for status writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackConfig {
    pub batch_size: usize,
    pub delay: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_FEEDBACK_BATCH_SIZE,
            delay: Duration::from_millis(DEFAULT_FEEDBACK_DELAY_MS),
        }
    }
}

pub struct SheetSource {
    client: Arc<dyn SheetClient>,
    spreadsheet_id: String,
    range: SheetRange,
    mapping: ColumnMapping,
    feedback: FeedbackConfig,
    cache: Option<Arc<RowCache>>,
}

impl SheetSource {
    pub fn new(
        client: Arc<dyn SheetClient>,
        spreadsheet_id: impl Into<String>,
        range: SheetRange,
        mapping: ColumnMapping,
    ) -> Self {
        Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            range,
            mapping,
            feedback: FeedbackConfig::default(),
            cache: None,
        }
    }

    pub fn with_feedback(mut self, feedback: FeedbackConfig) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_cache(mut self, cache: Arc<RowCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn cache_key(&self) -> String {
        RowCache::key(&self.spreadsheet_id, self.range.as_str())
    }

    fn status_column(&self) -> Option<usize> {
        self.mapping
            .status_position()
            .map(|pos| self.range.start_column + pos)
    }
}

#[async_trait]
impl RowSource for SheetSource {
    fn name(&self) -> &str {
        "sheet"
    }

    fn supports_status(&self) -> bool {
        self.mapping.has_status()
    }

    async fn extract(&self) -> Result<Vec<RawRow>, ExtractError> {
        let key = self.cache_key();
        if let Some(cache) = &self.cache {
            if let Some(rows) = cache.get(&key) {
                info!(range = self.range.as_str(), rows = rows.len(), "Using cached sheet rows");
                return Ok(rows);
            }
        }

        let values = self.client.read(self.range.as_str()).await?;
        let rows: Vec<RawRow> = values
            .iter()
            .enumerate()
            .map(|(i, cells)| {
                self.mapping.build_row(self.range.start_row + i, |pos, _| {
                    cells.get(pos).cloned().flatten()
                })
            })
            .filter(|row| !row.is_blank())
            .collect();

        info!(range = self.range.as_str(), rows = rows.len(), "Extracted sheet rows");

        if let Some(cache) = &self.cache {
            cache.insert(key, rows.clone());
        }
        Ok(rows)
    }

    async fn write_statuses(&self, updates: &[StatusUpdate]) -> Result<(), ExtractError> {
        let Some(column) = self.status_column() else {
            return Ok(());
        };
        if updates.is_empty() {
            return Ok(());
        }

        let chunks: Vec<&[StatusUpdate]> = updates.chunks(self.feedback.batch_size.max(1)).collect();
        let total = chunks.len();

        for (n, chunk) in chunks.into_iter().enumerate() {
            let batch = chunk
                .iter()
                .map(|u| RangeUpdate {
                    range: self.range.cell(column, u.index),
                    values: vec![vec![u.status.to_string()]],
                })
                .collect();

            self.client.write_batch(batch).await?;
            debug!(batch = n + 1, total, size = chunk.len(), "Wrote status batch");

            if n + 1 < total && !self.feedback.delay.is_zero() {
                tokio::time::sleep(self.feedback.delay).await;
            }
        }

        if let Some(cache) = &self.cache {
            cache.invalidate(&self.cache_key());
        }

        info!(updates = updates.len(), batches = total, "Wrote status feedback");
        Ok(())
    }
}
