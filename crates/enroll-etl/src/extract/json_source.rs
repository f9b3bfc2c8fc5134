//! JSON file source
//!
//! Accepts either a top-level array of objects or an object holding that
//! array under a configured key. Row indexes are 0-based array positions.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{json_cell, ColumnMapping, ExtractError, RawRow, RowSource};

pub struct JsonSource {
    path: PathBuf,
    mapping: ColumnMapping,
    records_key: Option<String>,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>, mapping: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            mapping,
            records_key: None,
        }
    }

    /// Read records from `document[key]` instead of the document root
    pub fn with_records_key(mut self, key: impl Into<String>) -> Self {
        self.records_key = Some(key.into());
        self
    }

    pub fn parse(&self, data: &[u8]) -> Result<Vec<RawRow>, ExtractError> {
        let document: Json = serde_json::from_slice(data)?;

        let records = match (&self.records_key, &document) {
            (None, Json::Array(items)) => items,
            (Some(key), Json::Object(map)) => match map.get(key) {
                Some(Json::Array(items)) => items,
                _ => {
                    return Err(ExtractError::Shape(format!(
                        "expected an array under key '{}'",
                        key
                    )))
                },
            },
            _ => {
                return Err(ExtractError::Shape(
                    "expected a JSON array of objects".to_string(),
                ))
            },
        };

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let Json::Object(object) = record else {
                return Err(ExtractError::Shape(format!(
                    "record {} is not an object",
                    index
                )));
            };

            let row = self
                .mapping
                .build_row(index, |_, key| object.get(key).and_then(json_cell));

            if row.is_blank() {
                debug!(index, "Skipping empty JSON record");
                continue;
            }
            rows.push(row);
        }

        Ok(rows)
    }
}

#[async_trait]
impl RowSource for JsonSource {
    fn name(&self) -> &str {
        "json"
    }

    async fn extract(&self) -> Result<Vec<RawRow>, ExtractError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ExtractError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        let rows = self.parse(&data)?;
        info!(path = %self.path.display(), rows = rows.len(), "Extracted JSON records");
        Ok(rows)
    }
}
