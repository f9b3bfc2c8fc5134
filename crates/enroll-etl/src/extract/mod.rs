//! Source adapters
//!
//! Every source produces an ordered `Vec<RawRow>`. Rows are keyed by field
//! name through a [`ColumnMapping`] applied at extraction time, so the
//! validators never depend on where a column sits in the source.
//!
//! - **sheet**: live spreadsheet with a status column and per-row feedback
//! - **csv_source**: CSV file with a header row
//! - **json_source**: JSON array of objects
//! - **cache**: TTL cache the spreadsheet source reads through

pub mod cache;
pub mod csv_source;
pub mod json_source;
pub mod sheet;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use cache::RowCache;
pub use csv_source::CsvSource;
pub use json_source::JsonSource;
pub use sheet::{FeedbackConfig, HttpSheetClient, SheetClient, SheetRange, SheetSource};

/// Extraction and feedback errors; all of them are fatal for a run
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source is missing column '{0}'")]
    MissingColumn(String),

    #[error("Unexpected source shape: {0}")]
    Shape(String),

    #[error("Spreadsheet request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Spreadsheet API returned {status}: {body}")]
    Api { status: u16, body: String },
}

impl ExtractError {
    /// Timeouts, refused connections, throttling and server-side errors
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::Http(e) => e.is_timeout() || e.is_connect(),
            ExtractError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// One source row, keyed by target field name
///
/// Blank cells are stored as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Source location: spreadsheet row number, CSV line, or array position
    pub index: usize,
    /// Processing marker read from the source's status column, if it has one
    pub status: Option<String>,
    pub fields: BTreeMap<String, Option<String>>,
}

impl RawRow {
    pub fn new(index: usize, fields: BTreeMap<String, Option<String>>) -> Self {
        Self {
            index,
            status: None,
            fields,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    pub fn is_blank(&self) -> bool {
        self.status.is_none() && self.fields.values().all(Option::is_none)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Field(String),
    Status,
}

/// Ordered mapping from source columns to target fields
///
/// For positional sources (spreadsheet ranges) the entry order is the cell
/// order; for keyed sources (CSV headers, JSON keys) the source name is
/// looked up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(String, Target)>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, source: impl Into<String>, field: impl Into<String>) -> Self {
        self.entries.push((source.into(), Target::Field(field.into())));
        self
    }

    pub fn status(mut self, source: impl Into<String>) -> Self {
        self.entries.push((source.into(), Target::Status));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(source, _)| source.as_str())
    }

    pub fn has_status(&self) -> bool {
        self.status_position().is_some()
    }

    /// Position of the status column among the mapping entries
    pub fn status_position(&self) -> Option<usize> {
        self.entries.iter().position(|(_, t)| *t == Target::Status)
    }

    /// Build a row by asking `cell` for each entry's value
    ///
    /// `cell` receives the entry position and the source column name.
    pub fn build_row<F>(&self, index: usize, mut cell: F) -> RawRow
    where
        F: FnMut(usize, &str) -> Option<String>,
    {
        let mut fields = BTreeMap::new();
        let mut status = None;

        for (pos, (source, target)) in self.entries.iter().enumerate() {
            let value = cell(pos, source).filter(|v| !v.trim().is_empty());
            match target {
                Target::Field(name) => {
                    fields.insert(name.clone(), value);
                },
                Target::Status => status = value.map(|v| v.trim().to_string()),
            }
        }

        RawRow {
            index,
            status,
            fields,
        }
    }
}

/// Status markers written back to a live source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMarker {
    Pending,
    Synced,
    Error(String),
}

pub const PENDING: &str = "pending";
pub const SYNCED: &str = "synced";

impl StatusMarker {
    /// Whether a raw status cell selects the row for processing
    pub fn is_pending(status: Option<&str>) -> bool {
        status.is_some_and(|s| s.trim().eq_ignore_ascii_case(PENDING))
    }
}

impl fmt::Display for StatusMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMarker::Pending => write!(f, "{}", PENDING),
            StatusMarker::Synced => write!(f, "{}", SYNCED),
            StatusMarker::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub index: usize,
    pub status: StatusMarker,
}

impl StatusUpdate {
    pub fn new(index: usize, status: StatusMarker) -> Self {
        Self { index, status }
    }
}

/// A producer of raw rows
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether rows carry a status marker and accept feedback
    fn supports_status(&self) -> bool {
        false
    }

    /// Read every row, in source order
    async fn extract(&self) -> Result<Vec<RawRow>, ExtractError>;

    /// Write terminal markers back to the source
    ///
    /// Sources without a status column ignore feedback.
    async fn write_statuses(&self, updates: &[StatusUpdate]) -> Result<(), ExtractError> {
        let _ = updates;
        Ok(())
    }

    async fn write_status(&self, index: usize, status: StatusMarker) -> Result<(), ExtractError> {
        self.write_statuses(&[StatusUpdate::new(index, status)])
            .await
    }
}

/// Render a JSON scalar the way a spreadsheet cell would show it
pub(crate) fn json_cell(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_mapping_with_status() {
        let mapping = ColumnMapping::new()
            .field("Name", "name")
            .field("Email", "email")
            .status("Status");

        let cells = [Some("Ada".to_string()), Some("  ".to_string()), Some(" Pending ".into())];
        let row = mapping.build_row(5, |pos, _| cells.get(pos).cloned().flatten());

        assert_eq!(row.index, 5);
        assert_eq!(row.get("name"), Some("Ada"));
        assert_eq!(row.get("email"), None);
        assert_eq!(row.status.as_deref(), Some("Pending"));
        assert_eq!(mapping.status_position(), Some(2));
    }

    #[test]
    fn test_short_rows_map_missing_cells_to_none() {
        let mapping = ColumnMapping::new().field("A", "a").field("B", "b");
        let cells = [Some("x".to_string())];
        let row = mapping.build_row(1, |pos, _| cells.get(pos).cloned().flatten());
        assert_eq!(row.get("a"), Some("x"));
        assert!(row.fields.contains_key("b"));
        assert_eq!(row.get("b"), None);
    }

    #[test]
    fn test_pending_matching() {
        assert!(StatusMarker::is_pending(Some("pending")));
        assert!(StatusMarker::is_pending(Some(" PENDING ")));
        assert!(!StatusMarker::is_pending(Some("synced")));
        assert!(!StatusMarker::is_pending(Some("error: email: is required")));
        assert!(!StatusMarker::is_pending(None));
    }

    #[test]
    fn test_status_marker_display() {
        assert_eq!(StatusMarker::Synced.to_string(), "synced");
        assert_eq!(
            StatusMarker::Error("age: must be between 16 and 100".into()).to_string(),
            "error: age: must be between 16 and 100"
        );
    }

    #[test]
    fn test_json_cell() {
        assert_eq!(json_cell(&serde_json::json!(12.5)), Some("12.5".to_string()));
        assert_eq!(json_cell(&serde_json::json!("PRT")), Some("PRT".to_string()));
        assert_eq!(json_cell(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExtractError::Api {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(ExtractError::Api {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!ExtractError::Api {
            status: 403,
            body: String::new()
        }
        .is_transient());
        assert!(!ExtractError::MissingColumn("email".into()).is_transient());
    }
}
