//! Post-load data quality audit
//!
//! Four independent checks, each run only when its configuration is present:
//!
//! | Check       | Config key         | Affects `passed` |
//! |-------------|--------------------|------------------|
//! | `rowCount`  | `row_count`        | yes              |
//! | `duplicates`| `unique_column`    | yes              |
//! | `nullCounts`| `required_columns` | no, informational|
//! | `dataTypes` | `data_types`       | yes              |
//!
//! A store error stops the audit: checks already computed stay in the
//! report, `error` is set and `passed` is forced to false. Audit results are
//! never fatal to a run.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub use store::{AuditStore, PgAuditStore};

use crate::db::DbError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountRule {
    pub expected: i64,
    #[serde(default)]
    pub tolerance: i64,
}

/// Per-column value check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum TypeCheck {
    /// Non-null values must fall inside `[min, max]`
    Range { min: Option<f64>, max: Option<f64> },
    /// Non-null values must match the email shape
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRule {
    pub column: String,
    #[serde(flatten)]
    pub check: TypeCheck,
}

impl TypeRule {
    pub fn range(column: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            column: column.into(),
            check: TypeCheck::Range { min, max },
        }
    }

    pub fn email(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            check: TypeCheck::Email,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub table: String,
    pub row_count: Option<RowCountRule>,
    pub unique_column: Option<String>,
    pub required_columns: Option<Vec<String>>,
    pub data_types: Option<Vec<TypeRule>>,
}

impl QualityConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCountResult {
    pub expected: i64,
    pub actual: i64,
    pub tolerance: i64,
    pub difference: i64,
    pub valid: bool,
}

impl RowCountResult {
    pub fn evaluate(rule: &RowCountRule, actual: i64) -> Self {
        let difference = (actual - rule.expected).abs();
        Self {
            expected: rule.expected,
            actual,
            tolerance: rule.tolerance,
            difference,
            valid: difference <= rule.tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatesResult {
    pub column: String,
    pub has_duplicates: bool,
    /// Number of values that occur more than once
    pub count: usize,
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicatesResult {
    pub fn from_groups(column: impl Into<String>, groups: Vec<DuplicateGroup>) -> Self {
        Self {
            column: column.into(),
            has_duplicates: !groups.is_empty(),
            count: groups.len(),
            groups,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypesResult {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<RowCountResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<DuplicatesResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_counts: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_types: Option<DataTypesResult>,
}

impl QualityChecks {
    /// AND of every present check except the null counts
    pub fn passed(&self) -> bool {
        self.row_count.as_ref().is_none_or(|r| r.valid)
            && self.duplicates.as_ref().is_none_or(|d| !d.has_duplicates)
            && self.data_types.as_ref().is_none_or(|t| t.valid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub table_name: String,
    pub timestamp: DateTime<Utc>,
    pub checks: QualityChecks,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct QualityAuditor<'a> {
    store: &'a dyn AuditStore,
}

impl<'a> QualityAuditor<'a> {
    pub fn new(store: &'a dyn AuditStore) -> Self {
        Self { store }
    }

    /// Run every configured check and build the report
    pub async fn audit(&self, config: &QualityConfig) -> QualityReport {
        let mut checks = QualityChecks::default();
        let error = self.run_checks(config, &mut checks).await.err();

        let report = QualityReport {
            table_name: config.table.clone(),
            timestamp: Utc::now(),
            passed: error.is_none() && checks.passed(),
            error: error.map(|e| e.to_string()),
            checks,
        };

        match &report.error {
            Some(error) => warn!(table = %report.table_name, %error, "Quality audit errored"),
            None if !report.passed => {
                warn!(table = %report.table_name, "Quality audit failed")
            },
            None => info!(table = %report.table_name, "Quality audit passed"),
        }

        report
    }

    async fn run_checks(
        &self,
        config: &QualityConfig,
        checks: &mut QualityChecks,
    ) -> Result<(), DbError> {
        let table = config.table.as_str();

        if let Some(rule) = &config.row_count {
            let actual = self.store.count_rows(table).await?;
            let result = RowCountResult::evaluate(rule, actual);
            if !result.valid {
                warn!(
                    table,
                    expected = result.expected,
                    actual = result.actual,
                    tolerance = result.tolerance,
                    "Row count outside tolerance"
                );
            }
            checks.row_count = Some(result);
        }

        if let Some(column) = &config.unique_column {
            let groups = self.store.duplicate_groups(table, column).await?;
            let result = DuplicatesResult::from_groups(column, groups);
            if result.has_duplicates {
                warn!(table, column = %column, groups = result.count, "Duplicate values found");
            }
            checks.duplicates = Some(result);
        }

        if let Some(columns) = &config.required_columns {
            let mut counts = BTreeMap::new();
            for column in columns {
                counts.insert(column.clone(), self.store.null_count(table, column).await?);
            }
            checks.null_counts = Some(counts);
        }

        if let Some(rules) = &config.data_types {
            let mut issues = Vec::new();
            for rule in rules {
                match &rule.check {
                    TypeCheck::Range { min, max } => {
                        let count = self
                            .store
                            .out_of_range_count(table, &rule.column, *min, *max)
                            .await?;
                        if count > 0 {
                            issues.push(format!(
                                "{} rows have {} outside {}",
                                count,
                                rule.column,
                                describe_range(*min, *max)
                            ));
                        }
                    },
                    TypeCheck::Email => {
                        let count = self.store.invalid_email_count(table, &rule.column).await?;
                        if count > 0 {
                            issues.push(format!("{} rows have an invalid {}", count, rule.column));
                        }
                    },
                }
            }
            for issue in &issues {
                warn!(table, %issue, "Data type check issue");
            }
            checks.data_types = Some(DataTypesResult {
                valid: issues.is_empty(),
                issues,
            });
        }

        Ok(())
    }
}

fn describe_range(min: Option<f64>, max: Option<f64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("[{}, {}]", min, max),
        (Some(min), None) => format!("[{}, ∞)", min),
        (None, Some(max)) => format!("(-∞, {}]", max),
        (None, None) => "(-∞, ∞)".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Column-oriented table held in memory
    #[derive(Default)]
    struct MemoryStore {
        columns: HashMap<String, Vec<Option<String>>>,
        failing_column: Option<String>,
    }

    impl MemoryStore {
        fn with_column(mut self, name: &str, values: &[Option<&str>]) -> Self {
            self.columns.insert(
                name.to_string(),
                values.iter().map(|v| v.map(str::to_string)).collect(),
            );
            self
        }

        fn column(&self, name: &str) -> Result<&Vec<Option<String>>, DbError> {
            if self.failing_column.as_deref() == Some(name) {
                return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
            }
            self.columns
                .get(name)
                .ok_or_else(|| DbError::config(format!("no column {}", name)))
        }
    }

    #[async_trait]
    impl AuditStore for MemoryStore {
        async fn count_rows(&self, _table: &str) -> Result<i64, DbError> {
            Ok(self.columns.values().next().map_or(0, |c| c.len() as i64))
        }

        async fn duplicate_groups(
            &self,
            _table: &str,
            column: &str,
        ) -> Result<Vec<DuplicateGroup>, DbError> {
            let mut counts: BTreeMap<String, i64> = BTreeMap::new();
            for value in self.column(column)?.iter().flatten() {
                *counts.entry(value.clone()).or_default() += 1;
            }
            Ok(counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(value, count)| DuplicateGroup { value, count })
                .collect())
        }

        async fn null_count(&self, _table: &str, column: &str) -> Result<i64, DbError> {
            Ok(self.column(column)?.iter().filter(|v| v.is_none()).count() as i64)
        }

        async fn out_of_range_count(
            &self,
            _table: &str,
            column: &str,
            min: Option<f64>,
            max: Option<f64>,
        ) -> Result<i64, DbError> {
            Ok(self
                .column(column)?
                .iter()
                .flatten()
                .filter_map(|v| v.parse::<f64>().ok())
                .filter(|v| min.is_some_and(|m| *v < m) || max.is_some_and(|m| *v > m))
                .count() as i64)
        }

        async fn invalid_email_count(&self, _table: &str, column: &str) -> Result<i64, DbError> {
            Ok(self
                .column(column)?
                .iter()
                .flatten()
                .filter(|v| !crate::validation::fields::is_valid_email(v))
                .count() as i64)
        }
    }

    fn emails(values: &[&str]) -> MemoryStore {
        let values: Vec<Option<&str>> = values.iter().map(|v| Some(*v)).collect();
        MemoryStore::default().with_column("email", &values)
    }

    #[test]
    fn test_row_count_tolerance() {
        let rule = RowCountRule {
            expected: 100,
            tolerance: 5,
        };
        assert!(RowCountResult::evaluate(&rule, 104).valid);
        assert!(RowCountResult::evaluate(&rule, 95).valid);

        let result = RowCountResult::evaluate(&rule, 106);
        assert!(!result.valid);
        assert_eq!(result.difference, 6);
    }

    #[tokio::test]
    async fn test_duplicate_check_counts_groups() {
        let store = emails(&["a", "b", "a", "c"]);
        let mut config = QualityConfig::new("students");
        config.unique_column = Some("email".to_string());

        let report = QualityAuditor::new(&store).audit(&config).await;

        let duplicates = report.checks.duplicates.unwrap();
        assert!(duplicates.has_duplicates);
        assert_eq!(duplicates.count, 1);
        assert_eq!(
            duplicates.groups,
            vec![DuplicateGroup {
                value: "a".to_string(),
                count: 2
            }]
        );
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_null_counts_never_fail_the_report() {
        let store = MemoryStore::default()
            .with_column("email", &[Some("a@x.org"), Some("b@x.org")])
            .with_column("name", &[None, Some("Bo")]);
        let mut config = QualityConfig::new("students");
        config.required_columns = Some(vec!["name".to_string(), "email".to_string()]);

        let report = QualityAuditor::new(&store).audit(&config).await;

        let nulls = report.checks.null_counts.as_ref().unwrap();
        assert_eq!(nulls["name"], 1);
        assert_eq!(nulls["email"], 0);
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_absent_checks_are_excluded() {
        let store = MemoryStore::default();
        let report = QualityAuditor::new(&store)
            .audit(&QualityConfig::new("students"))
            .await;

        assert!(report.passed);
        assert_eq!(report.checks, QualityChecks::default());
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_data_type_issues_fail_the_report() {
        let store = MemoryStore::default()
            .with_column("age", &[Some("20"), Some("15"), Some("101"), None])
            .with_column("email", &[Some("a@x.org"), Some("bad"), None, None]);
        let mut config = QualityConfig::new("students");
        config.data_types = Some(vec![
            TypeRule::range("age", Some(16.0), Some(100.0)),
            TypeRule::email("email"),
        ]);

        let report = QualityAuditor::new(&store).audit(&config).await;

        let types = report.checks.data_types.as_ref().unwrap();
        assert!(!types.valid);
        assert_eq!(
            types.issues,
            vec![
                "2 rows have age outside [16, 100]".to_string(),
                "1 rows have an invalid email".to_string(),
            ]
        );
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_passed_combines_present_checks() {
        let store = emails(&["a@x.org", "b@x.org", "c@x.org"]);
        let mut config = QualityConfig::new("students");
        config.unique_column = Some("email".to_string());
        config.row_count = Some(RowCountRule {
            expected: 3,
            tolerance: 0,
        });
        config.data_types = Some(vec![TypeRule::email("email")]);

        let report = QualityAuditor::new(&store).audit(&config).await;
        assert!(report.passed);

        config.row_count = Some(RowCountRule {
            expected: 10,
            tolerance: 2,
        });
        let report = QualityAuditor::new(&store).audit(&config).await;
        assert!(!report.passed);
        assert!(report.checks.duplicates.is_some());
    }

    #[tokio::test]
    async fn test_store_error_keeps_computed_checks() {
        let mut store = emails(&["a@x.org", "a@x.org"]);
        store.failing_column = Some("name".to_string());

        let mut config = QualityConfig::new("students");
        config.row_count = Some(RowCountRule {
            expected: 2,
            tolerance: 0,
        });
        config.required_columns = Some(vec!["name".to_string()]);
        config.data_types = Some(vec![TypeRule::email("email")]);

        let report = QualityAuditor::new(&store).audit(&config).await;

        assert!(report.checks.row_count.as_ref().unwrap().valid);
        assert!(report.checks.null_counts.is_none());
        assert!(report.checks.data_types.is_none());
        assert!(report.error.is_some());
        assert!(!report.passed);
    }

    #[test]
    fn test_report_json_keys() {
        let report = QualityReport {
            table_name: "students".to_string(),
            timestamp: Utc::now(),
            checks: QualityChecks {
                row_count: Some(RowCountResult::evaluate(
                    &RowCountRule {
                        expected: 1,
                        tolerance: 0,
                    },
                    1,
                )),
                null_counts: Some(BTreeMap::from([("name".to_string(), 0)])),
                ..QualityChecks::default()
            },
            passed: true,
            error: None,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tableName"], "students");
        assert_eq!(json["checks"]["rowCount"]["valid"], true);
        assert_eq!(json["checks"]["nullCounts"]["name"], 0);
        assert!(json["checks"].get("duplicates").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_type_rule_config_shape() {
        let rule: TypeRule =
            serde_json::from_str(r#"{"column": "age", "check": "range", "min": 16, "max": 100}"#)
                .unwrap();
        assert_eq!(rule, TypeRule::range("age", Some(16.0), Some(100.0)));
    }
}
