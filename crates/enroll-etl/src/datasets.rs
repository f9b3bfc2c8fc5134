//! Built-in datasets
//!
//! Each dataset bundles its column mapping, field rules, target table and
//! audit configuration. Rule field names and table column names are the
//! same strings.

use enroll_common::EtlError;
use std::fmt;
use std::str::FromStr;

use crate::extract::ColumnMapping;
use crate::load::{ColumnType, ConflictAction, TableSpec};
use crate::quality::{QualityConfig, RowCountRule, TypeRule};
use crate::validation::{FieldKind, FieldRule, RuleSet, Value, EMAIL_MAX_LEN, PHONE_MAX_LEN};

pub const GRADES: [&str; 6] = ["A", "B", "C", "D", "E", "F"];
pub const INCOME_GROUPS: [&str; 4] = ["LOW", "LOWER_MIDDLE", "UPPER_MIDDLE", "HIGH"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetName {
    Students,
    Rankings,
    Countries,
}

impl DatasetName {
    pub const ALL: [DatasetName; 3] = [
        DatasetName::Students,
        DatasetName::Rankings,
        DatasetName::Countries,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetName::Students => "students",
            DatasetName::Rankings => "rankings",
            DatasetName::Countries => "countries",
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetName {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DatasetName::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EtlError::UnknownDataset(s.to_string()))
    }
}

/// Where a dataset's rows come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Sheet,
    Csv,
    Json,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: DatasetName,
    pub source: SourceKind,
    pub mapping: ColumnMapping,
    pub rules: RuleSet,
    pub table: TableSpec,
    pub quality: QualityConfig,
}

impl Dataset {
    pub fn get(name: DatasetName) -> Self {
        match name {
            DatasetName::Students => students(),
            DatasetName::Rankings => rankings(),
            DatasetName::Countries => countries(),
        }
    }

    /// Audit configuration with an optional row-count rule added
    pub fn quality_with(&self, row_count: Option<RowCountRule>) -> QualityConfig {
        QualityConfig {
            row_count,
            ..self.quality.clone()
        }
    }
}

fn allowed(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn int(min: i64, max: i64) -> FieldKind {
    FieldKind::Integer {
        min: Some(min),
        max: Some(max),
    }
}

fn numeric(min: f64, max: f64) -> FieldKind {
    FieldKind::Numeric {
        min: Some(min),
        max: Some(max),
    }
}

/// Enrollment rows from the live spreadsheet
pub fn students() -> Dataset {
    Dataset {
        name: DatasetName::Students,
        source: SourceKind::Sheet,
        mapping: ColumnMapping::new()
            .field("Name", "name")
            .field("Email", "email")
            .field("Phone", "phone")
            .field("Course", "course")
            .field("Age", "age")
            .field("Grade", "grade")
            .status("Status"),
        rules: RuleSet::new(
            "students",
            vec![
                FieldRule::required("name", FieldKind::Name { max_len: 100 }),
                FieldRule::required("email", FieldKind::Email { max_len: EMAIL_MAX_LEN }),
                FieldRule::optional("phone", FieldKind::Phone { max_len: PHONE_MAX_LEN })
                    .with_default(Value::text("")),
                FieldRule::optional("course", FieldKind::String { max_len: 100 })
                    .with_default(Value::text("Undeclared")),
                FieldRule::required("age", int(16, 100)),
                FieldRule::optional(
                    "grade",
                    FieldKind::Enum {
                        allowed: allowed(&GRADES),
                    },
                ),
            ],
        ),
        table: TableSpec::new("students", "email", ConflictAction::DoUpdate)
            .column("name", ColumnType::Text)
            .column("email", ColumnType::Text)
            .column("phone", ColumnType::Text)
            .column("course", ColumnType::Text)
            .column("age", ColumnType::BigInt)
            .column("grade", ColumnType::Text),
        quality: QualityConfig {
            table: "students".to_string(),
            row_count: None,
            unique_column: Some("email".to_string()),
            required_columns: Some(vec!["name".to_string(), "email".to_string()]),
            data_types: Some(vec![
                TypeRule::range("age", Some(16.0), Some(100.0)),
                TypeRule::email("email"),
            ]),
        },
    }
}

/// University rankings from a CSV export
pub fn rankings() -> Dataset {
    Dataset {
        name: DatasetName::Rankings,
        source: SourceKind::Csv,
        mapping: ColumnMapping::new()
            .field("institution_id", "institution_id")
            .field("institution", "institution")
            .field("country", "country")
            .field("world_rank", "world_rank")
            .field("overall_score", "overall_score")
            .field("year", "year"),
        rules: RuleSet::new(
            "rankings",
            vec![
                FieldRule::required("institution_id", FieldKind::String { max_len: 32 }),
                FieldRule::required("institution", FieldKind::Name { max_len: 200 }),
                FieldRule::required("country", FieldKind::String { max_len: 100 }),
                FieldRule::required("world_rank", int(1, 5000)),
                FieldRule::optional("overall_score", numeric(0.0, 100.0)),
                FieldRule::required("year", int(1990, 2100)),
            ],
        ),
        table: TableSpec::new(
            "university_rankings",
            "institution_id",
            ConflictAction::DoNothing,
        )
        .column("institution_id", ColumnType::Text)
        .column("institution", ColumnType::Text)
        .column("country", ColumnType::Text)
        .column("world_rank", ColumnType::BigInt)
        .column("overall_score", ColumnType::Double)
        .column("year", ColumnType::BigInt),
        quality: QualityConfig {
            table: "university_rankings".to_string(),
            row_count: None,
            unique_column: Some("institution_id".to_string()),
            required_columns: Some(vec![
                "institution_id".to_string(),
                "institution".to_string(),
            ]),
            data_types: Some(vec![
                TypeRule::range("world_rank", Some(1.0), Some(5000.0)),
                TypeRule::range("overall_score", Some(0.0), Some(100.0)),
            ]),
        },
    }
}

/// Country reference data from a JSON export
pub fn countries() -> Dataset {
    Dataset {
        name: DatasetName::Countries,
        source: SourceKind::Json,
        mapping: ColumnMapping::new()
            .field("code", "code")
            .field("name", "name")
            .field("region", "region")
            .field("population", "population")
            .field("area_km2", "area_km2")
            .field("income_group", "income_group"),
        rules: RuleSet::new(
            "countries",
            vec![
                FieldRule::required("code", FieldKind::String { max_len: 3 }),
                FieldRule::required("name", FieldKind::Name { max_len: 150 }),
                FieldRule::optional("region", FieldKind::String { max_len: 100 })
                    .with_default(Value::text("Unknown")),
                FieldRule::required("population", int(0, 10_000_000_000)),
                FieldRule::optional("area_km2", numeric(0.0, 20_000_000.0)),
                FieldRule::optional(
                    "income_group",
                    FieldKind::Enum {
                        allowed: allowed(&INCOME_GROUPS),
                    },
                ),
            ],
        ),
        table: TableSpec::new("countries", "code", ConflictAction::DoNothing)
            .column("code", ColumnType::Text)
            .column("name", ColumnType::Text)
            .column("region", ColumnType::Text)
            .column("population", ColumnType::BigInt)
            .column("area_km2", ColumnType::Double)
            .column("income_group", ColumnType::Text),
        quality: QualityConfig {
            table: "countries".to_string(),
            row_count: None,
            unique_column: Some("code".to_string()),
            required_columns: Some(vec!["code".to_string(), "name".to_string()]),
            data_types: Some(vec![TypeRule::range(
                "population",
                Some(0.0),
                Some(10_000_000_000.0),
            )]),
        },
    }
}
