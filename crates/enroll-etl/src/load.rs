//! Transactional, idempotent loading
//!
//! All accepted records of a run are written inside one transaction, in
//! chunks of at most `batch_size` rows per INSERT. Every INSERT carries an
//! `ON CONFLICT (<unique key>)` clause so re-submitting an already loaded
//! record is either skipped or merged, never a uniqueness violation. Any
//! failing chunk rolls back the whole transaction.
//!
//! Inserted rows are told apart from conflict-updated ones with
//! `RETURNING (xmax = 0)`: a freshly inserted tuple has no deleting
//! transaction. `DO NOTHING` returns nothing for skipped rows.

use async_trait::async_trait;
use enroll_common::EtlError;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{is_transient_sqlx, quote_ident};
use crate::validation::{NormalizedRecord, Value};

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Postgres limit on bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Loading batch {batch} into {table} failed, transaction rolled back: {source}")]
    Batch {
        table: String,
        batch: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Etl(#[from] EtlError),
}

impl LoadError {
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Batch { source, .. } => is_transient_sqlx(source),
            LoadError::Sqlx(e) => is_transient_sqlx(e),
            LoadError::Etl(_) => false,
        }
    }
}

/// SQL type a column binds as; also used for typed NULLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    BigInt,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Keep the stored row
    DoNothing,
    /// Overwrite the stored row's non-key columns and touch `updated_at`
    DoUpdate,
}

/// Target table layout and its idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    pub unique_key: String,
    pub on_conflict: ConflictAction,
}

impl TableSpec {
    pub fn new(
        table: impl Into<String>,
        unique_key: impl Into<String>,
        on_conflict: ConflictAction,
    ) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            unique_key: unique_key.into(),
            on_conflict,
        }
    }

    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            column_type,
        });
        self
    }

    /// Rows per INSERT, bounded by the bind parameter limit
    pub fn chunk_size(&self, batch_size: usize) -> usize {
        let per_statement = MAX_BIND_PARAMS / self.columns.len().max(1);
        batch_size.clamp(1, per_statement.max(1))
    }

    /// `INSERT INTO "table" ("a", "b") `
    pub fn insert_prefix(&self) -> Result<String, EtlError> {
        if !self.columns.iter().any(|c| c.name == self.unique_key) {
            return Err(EtlError::config(format!(
                "unique key '{}' is not a column of table '{}'",
                self.unique_key, self.table
            )));
        }

        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(format!(
            "INSERT INTO {} ({}) ",
            quote_ident(&self.table)?,
            columns.join(", ")
        ))
    }

    /// Conflict handling plus the inserted-row marker
    pub fn conflict_clause(&self) -> Result<String, EtlError> {
        let key = quote_ident(&self.unique_key)?;

        let action = match self.on_conflict {
            ConflictAction::DoNothing => "DO NOTHING".to_string(),
            ConflictAction::DoUpdate => {
                let mut assignments = Vec::new();
                for column in self.columns.iter().filter(|c| c.name != self.unique_key) {
                    let name = quote_ident(&column.name)?;
                    assignments.push(format!("{name} = EXCLUDED.{name}"));
                }
                assignments.push("\"updated_at\" = NOW()".to_string());
                format!("DO UPDATE SET {}", assignments.join(", "))
            },
        };

        Ok(format!(
            " ON CONFLICT ({}) {} RETURNING (xmax = 0) AS inserted",
            key, action
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Committed,
    RolledBack,
    /// Nothing to load, no transaction opened
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch: usize,
    pub rows_attempted: usize,
    pub rows_inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub rows_attempted: usize,
    /// Newly inserted rows; conflict-skipped and conflict-updated rows excluded
    pub rows_inserted: usize,
    pub batches: Vec<BatchOutcome>,
    pub status: TransactionStatus,
}

impl LoadOutcome {
    pub fn skipped() -> Self {
        Self {
            rows_attempted: 0,
            rows_inserted: 0,
            batches: Vec::new(),
            status: TransactionStatus::Skipped,
        }
    }
}

/// Destination for accepted records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Table or target name used in logs
    fn target(&self) -> &str;

    /// Write all records atomically
    async fn load(&self, records: &[NormalizedRecord]) -> Result<LoadOutcome, LoadError>;
}

/// Collapse records sharing a unique key
///
/// For `DO UPDATE` the last occurrence wins, the same final state row-by-row
/// upserts would leave; Postgres refuses to update one row twice in a single
/// statement. `DO NOTHING` keeps every record since later duplicates are
/// simply skipped.
pub fn collapse_duplicates<'r>(
    records: &'r [NormalizedRecord],
    spec: &TableSpec,
) -> Vec<&'r NormalizedRecord> {
    if spec.on_conflict == ConflictAction::DoNothing {
        return records.iter().collect();
    }

    let mut last_seen: HashMap<String, usize> = HashMap::new();
    for (pos, record) in records.iter().enumerate() {
        if let Some(key) = record.get(&spec.unique_key).filter(|v| !v.is_null()) {
            last_seen.insert(key.to_string(), pos);
        }
    }

    records
        .iter()
        .enumerate()
        .filter(|(pos, record)| match record.get(&spec.unique_key) {
            Some(key) if !key.is_null() => last_seen.get(&key.to_string()) == Some(pos),
            _ => true,
        })
        .map(|(_, record)| record)
        .collect()
}

/// Postgres sink for one table
pub struct PgLoader {
    pool: PgPool,
    spec: TableSpec,
    batch_size: usize,
}

impl PgLoader {
    pub fn new(pool: PgPool, spec: TableSpec) -> Self {
        Self {
            pool,
            spec,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn build_insert<'r>(
        &self,
        prefix: &str,
        conflict: &str,
        chunk: &[&'r NormalizedRecord],
    ) -> QueryBuilder<'r, Postgres> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(prefix);

        builder.push_values(chunk.iter(), |mut b, record| {
            for column in &self.spec.columns {
                let value = record.get(&column.name).filter(|v| !v.is_null());
                match column.column_type {
                    ColumnType::Text => {
                        b.push_bind(value.map(Value::to_string));
                    },
                    ColumnType::BigInt => {
                        b.push_bind(value.and_then(Value::as_i64));
                    },
                    ColumnType::Double => {
                        b.push_bind(value.and_then(Value::as_f64));
                    },
                }
            }
        });

        builder.push(conflict);
        builder
    }
}

#[async_trait]
impl RecordSink for PgLoader {
    fn target(&self) -> &str {
        &self.spec.table
    }

    async fn load(&self, records: &[NormalizedRecord]) -> Result<LoadOutcome, LoadError> {
        if records.is_empty() {
            return Ok(LoadOutcome::skipped());
        }

        let prefix = self.spec.insert_prefix()?;
        let conflict = self.spec.conflict_clause()?;
        let rows = collapse_duplicates(records, &self.spec);
        if rows.len() < records.len() {
            debug!(
                table = %self.spec.table,
                collapsed = records.len() - rows.len(),
                "Collapsed records sharing a unique key"
            );
        }

        let chunk_size = self.spec.chunk_size(self.batch_size);
        let total_chunks = rows.len().div_ceil(chunk_size);
        let mut batches = Vec::with_capacity(total_chunks);

        let mut tx = self.pool.begin().await?;

        for (chunk_idx, chunk) in rows.chunks(chunk_size).enumerate() {
            let batch = chunk_idx + 1;
            let mut builder = self.build_insert(&prefix, &conflict, chunk);

            let result = builder
                .build_query_scalar::<bool>()
                .fetch_all(&mut *tx)
                .await;

            let inserted_flags = match result {
                Ok(flags) => flags,
                Err(source) => {
                    if let Err(e) = tx.rollback().await {
                        warn!(table = %self.spec.table, error = %e, "Rollback failed");
                    }
                    return Err(LoadError::Batch {
                        table: self.spec.table.clone(),
                        batch,
                        source,
                    });
                },
            };

            let rows_inserted = inserted_flags.iter().filter(|inserted| **inserted).count();
            debug!(
                table = %self.spec.table,
                batch,
                total_chunks,
                rows = chunk.len(),
                rows_inserted,
                "Loaded batch"
            );

            batches.push(BatchOutcome {
                batch,
                rows_attempted: chunk.len(),
                rows_inserted,
            });
        }

        tx.commit().await?;

        let rows_inserted = batches.iter().map(|b| b.rows_inserted).sum();
        info!(
            table = %self.spec.table,
            rows_attempted = records.len(),
            rows_inserted,
            batches = batches.len(),
            "Load committed"
        );

        Ok(LoadOutcome {
            rows_attempted: records.len(),
            rows_inserted,
            batches,
            status: TransactionStatus::Committed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(on_conflict: ConflictAction) -> TableSpec {
        TableSpec::new("students", "email", on_conflict)
            .column("name", ColumnType::Text)
            .column("email", ColumnType::Text)
            .column("age", ColumnType::BigInt)
    }

    fn record(index: usize, email: &str, age: i64) -> NormalizedRecord {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), Value::text("Someone"));
        values.insert("email".to_string(), Value::text(email));
        values.insert("age".to_string(), Value::Integer(age));
        NormalizedRecord {
            source_index: index,
            values,
        }
    }

    #[test]
    fn test_insert_prefix_quotes_identifiers() {
        let prefix = spec(ConflictAction::DoNothing).insert_prefix().unwrap();
        assert_eq!(prefix, "INSERT INTO \"students\" (\"name\", \"email\", \"age\") ");
    }

    #[test]
    fn test_conflict_do_nothing() {
        let clause = spec(ConflictAction::DoNothing).conflict_clause().unwrap();
        assert_eq!(
            clause,
            " ON CONFLICT (\"email\") DO NOTHING RETURNING (xmax = 0) AS inserted"
        );
    }

    #[test]
    fn test_conflict_do_update_skips_key_and_touches_updated_at() {
        let clause = spec(ConflictAction::DoUpdate).conflict_clause().unwrap();
        assert_eq!(
            clause,
            " ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\", \
             \"age\" = EXCLUDED.\"age\", \"updated_at\" = NOW() RETURNING (xmax = 0) AS inserted"
        );
    }

    #[test]
    fn test_unsafe_identifiers_are_refused() {
        let spec = TableSpec::new("students; --", "email", ConflictAction::DoNothing)
            .column("email", ColumnType::Text);
        assert!(matches!(spec.insert_prefix(), Err(EtlError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_unique_key_must_be_a_column() {
        let spec = TableSpec::new("students", "email", ConflictAction::DoNothing)
            .column("name", ColumnType::Text);
        assert!(matches!(spec.insert_prefix(), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_chunk_size_respects_bind_limit() {
        let spec = spec(ConflictAction::DoNothing);
        assert_eq!(spec.chunk_size(500), 500);
        assert_eq!(spec.chunk_size(0), 1);
        assert_eq!(spec.chunk_size(1_000_000), 65_535 / 3);
    }

    #[test]
    fn test_collapse_duplicates_keeps_last_for_update() {
        let records = vec![
            record(2, "a@x.org", 20),
            record(3, "b@x.org", 21),
            record(4, "a@x.org", 22),
        ];

        let kept = collapse_duplicates(&records, &spec(ConflictAction::DoUpdate));
        let indexes: Vec<usize> = kept.iter().map(|r| r.source_index).collect();
        assert_eq!(indexes, vec![3, 4]);

        let kept = collapse_duplicates(&records, &spec(ConflictAction::DoNothing));
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_skipped_outcome() {
        let outcome = LoadOutcome::skipped();
        assert_eq!(outcome.status, TransactionStatus::Skipped);
        assert_eq!(outcome.rows_inserted, 0);
    }
}
