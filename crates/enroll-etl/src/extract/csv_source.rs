//! CSV file source
//!
//! The first line is the header; mapped columns are matched against it
//! case-insensitively. Row indexes are 1-based file line numbers, so the
//! first data row is line 2.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{ColumnMapping, ExtractError, RawRow, RowSource};

pub struct CsvSource {
    path: PathBuf,
    mapping: ColumnMapping,
    delimiter: u8,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, mapping: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            mapping,
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse CSV bytes into rows
    pub fn parse(&self, data: &[u8]) -> Result<Vec<RawRow>, ExtractError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let headers = reader.headers()?.clone();
        let positions = self
            .mapping
            .source_columns()
            .map(|column| {
                headers
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(column))
                    .ok_or_else(|| ExtractError::MissingColumn(column.to_string()))
            })
            .collect::<Result<Vec<usize>, _>>()?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(i + 2);

            let row = self.mapping.build_row(line, |pos, _| {
                positions
                    .get(pos)
                    .and_then(|&col| record.get(col))
                    .map(str::to_string)
            });

            if row.is_blank() {
                debug!(line, "Skipping blank CSV line");
                continue;
            }
            rows.push(row);
        }

        Ok(rows)
    }
}

#[async_trait]
impl RowSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn extract(&self) -> Result<Vec<RawRow>, ExtractError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ExtractError::Io {
                path: self.path.display().to_string(),
                source,
            })?;

        let rows = self.parse(&data)?;
        info!(path = %self.path.display(), rows = rows.len(), "Extracted CSV rows");
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn mapping() -> ColumnMapping {
        ColumnMapping::new()
            .field("institution_id", "institution_id")
            .field("Institution", "institution")
            .field("world_rank", "world_rank")
    }

    #[tokio::test]
    async fn test_extract_maps_headers_and_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "WORLD_RANK,institution,institution_id,extra").unwrap();
        writeln!(file, "1, Harvard University ,HARV,x").unwrap();
        writeln!(file, ",,,").unwrap();
        writeln!(file, "2,MIT,,y").unwrap();

        let source = CsvSource::new(file.path(), mapping());
        let rows = source.extract().await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 2);
        assert_eq!(rows[0].get("institution"), Some("Harvard University"));
        assert_eq!(rows[0].get("institution_id"), Some("HARV"));
        assert_eq!(rows[0].get("world_rank"), Some("1"));
        assert_eq!(rows[1].index, 4);
        assert_eq!(rows[1].get("institution_id"), None);
        assert!(rows.iter().all(|r| r.status.is_none()));
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let source = CsvSource::new("unused.csv", mapping());
        let err = source.parse(b"institution,world_rank\nMIT,2\n").unwrap_err();
        assert!(matches!(err, ExtractError::MissingColumn(ref c) if c == "institution_id"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = CsvSource::new("/nonexistent/rankings.csv", mapping());
        assert!(matches!(source.extract().await, Err(ExtractError::Io { .. })));
    }

    #[test]
    fn test_custom_delimiter() {
        let source = CsvSource::new("unused.csv", mapping()).with_delimiter(b';');
        let rows = source
            .parse(b"institution_id;institution;world_rank\nOXF;Oxford;3\n")
            .unwrap();
        assert_eq!(rows[0].get("institution"), Some("Oxford"));
    }
}
