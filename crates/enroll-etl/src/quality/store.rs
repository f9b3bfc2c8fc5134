//! Store queries behind the quality checks

use async_trait::async_trait;
use sqlx::PgPool;

use super::DuplicateGroup;
use crate::db::{quote_ident, DbError};
use crate::validation::fields::EMAIL_PATTERN;

/// Aggregate queries the auditor runs against a loaded table
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn count_rows(&self, table: &str) -> Result<i64, DbError>;

    /// Non-null values of `column` occurring more than once, most frequent first
    async fn duplicate_groups(&self, table: &str, column: &str)
        -> Result<Vec<DuplicateGroup>, DbError>;

    async fn null_count(&self, table: &str, column: &str) -> Result<i64, DbError>;

    /// Non-null values below `min` or above `max`; a missing bound is open
    async fn out_of_range_count(
        &self,
        table: &str,
        column: &str,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<i64, DbError>;

    /// Non-null values not matching the email shape
    async fn invalid_email_count(&self, table: &str, column: &str) -> Result<i64, DbError>;
}

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn duplicates_sql(table: &str, column: &str) -> Result<String, DbError> {
    let (table, column) = (quote_ident(table)?, quote_ident(column)?);
    Ok(format!(
        "SELECT {column}::text AS value, COUNT(*) AS count FROM {table} \
         WHERE {column} IS NOT NULL GROUP BY {column} HAVING COUNT(*) > 1 \
         ORDER BY count DESC, value"
    ))
}

fn range_sql(table: &str, column: &str) -> Result<String, DbError> {
    let (table, column) = (quote_ident(table)?, quote_ident(column)?);
    Ok(format!(
        "SELECT COUNT(*) FROM {table} WHERE {column} IS NOT NULL \
         AND (({column})::double precision < $1 OR ({column})::double precision > $2)"
    ))
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn count_rows(&self, table: &str) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    async fn duplicate_groups(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Vec<DuplicateGroup>, DbError> {
        let sql = duplicates_sql(table, column)?;
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(value, count)| DuplicateGroup { value, count })
            .collect())
    }

    async fn null_count(&self, table: &str, column: &str) -> Result<i64, DbError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
            quote_ident(table)?,
            quote_ident(column)?
        );
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    async fn out_of_range_count(
        &self,
        table: &str,
        column: &str,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<i64, DbError> {
        let sql = range_sql(table, column)?;
        Ok(sqlx::query_scalar(&sql)
            .bind(min.unwrap_or(f64::NEG_INFINITY))
            .bind(max.unwrap_or(f64::INFINITY))
            .fetch_one(&self.pool)
            .await?)
    }

    async fn invalid_email_count(&self, table: &str, column: &str) -> Result<i64, DbError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE {column} IS NOT NULL AND {column} !~ $1",
            table = quote_ident(table)?,
            column = quote_ident(column)?
        );
        Ok(sqlx::query_scalar(&sql)
            .bind(EMAIL_PATTERN)
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_sql() {
        assert_eq!(
            duplicates_sql("students", "email").unwrap(),
            "SELECT \"email\"::text AS value, COUNT(*) AS count FROM \"students\" \
             WHERE \"email\" IS NOT NULL GROUP BY \"email\" HAVING COUNT(*) > 1 \
             ORDER BY count DESC, value"
        );
    }

    #[test]
    fn test_range_sql_casts_for_comparison() {
        let sql = range_sql("countries", "population").unwrap();
        assert!(sql.contains("(\"population\")::double precision < $1"));
    }

    #[test]
    fn test_identifiers_are_checked() {
        assert!(duplicates_sql("students", "email; DELETE FROM students").is_err());
        assert!(range_sql("bad table", "age").is_err());
    }
}
