//! Row validation and sanitization
//!
//! Pure functions only: a [`RawRow`] goes in, a [`Validation`] comes out.
//! A [`RuleSet`] lists the target fields in a fixed order; every rule is
//! evaluated even after an earlier one fails so a rejected row carries its
//! complete list of [`FieldError`]s.
//!
//! Required fields reject the row when missing or malformed. Optional fields
//! degrade to their declared default (or NULL) instead, with two exceptions
//! that follow the source system's behavior:
//! - enum fields reject a present value outside the allowed set
//! - phone fields never reject, even when declared required

pub mod fields;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::extract::RawRow;

/// Max length enforced on every email field regardless of rule
pub const EMAIL_MAX_LEN: usize = 100;

/// Max length enforced on every phone field regardless of rule
pub const PHONE_MAX_LEN: usize = 20;

/// Sentinel used for optional name fields that sanitize to nothing
pub const UNKNOWN_NAME: &str = "Unknown";

/// A typed value ready to be bound into an INSERT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// Kind of a target field, with its constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text: trimmed, hazardous characters stripped, truncated
    String { max_len: usize },
    /// Person or institution name: free text plus whitespace collapsing and
    /// a word/space/hyphen character whitelist
    Name { max_len: usize },
    Email { max_len: usize },
    Phone { max_len: usize },
    Integer { min: Option<i64>, max: Option<i64> },
    Numeric { min: Option<f64>, max: Option<f64> },
    /// Case-insensitive match against a fixed set; stored uppercase
    Enum { allowed: Vec<String> },
}

/// Declares how one target field is sanitized and validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Substituted when an optional field is absent or malformed
    pub default: Option<Value>,
}

impl FieldRule {
    pub fn required(field: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            field: field.into(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(field: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            field: field.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Value used when an optional field cannot produce one of its own
    fn fallback(&self) -> Value {
        match (&self.default, &self.kind) {
            (Some(value), _) => value.clone(),
            (None, FieldKind::Name { .. }) => Value::text(UNKNOWN_NAME),
            (None, _) => Value::Null,
        }
    }
}

/// Ordered rules for one row shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<FieldRule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, rules: Vec<FieldRule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.field.as_str())
    }
}

/// A single field's reason for rejecting a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Typed, sanitized record ready for the loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Index of the [`RawRow`] this record came from
    pub source_index: usize,
    pub values: BTreeMap<String, Value>,
}

impl NormalizedRecord {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Outcome of validating one row
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted(NormalizedRecord),
    Rejected(Vec<FieldError>),
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted(_))
    }
}

/// Outcome of a single field rule
pub(crate) enum FieldOutcome {
    Valid(Value),
    /// Nothing usable; the rule decides between default and rejection
    Missing,
    /// Present but malformed
    Invalid(String),
}

/// Validate one row against a rule set
///
/// Rules run in declaration order and all of them run; the row is accepted
/// only when no required rule failed.
pub fn validate_row(row: &RawRow, rules: &RuleSet) -> Validation {
    let mut values = BTreeMap::new();
    let mut errors = Vec::new();

    for rule in &rules.rules {
        let raw = row.get(&rule.field);
        match apply_rule(rule, raw) {
            Ok(value) => {
                values.insert(rule.field.clone(), value);
            },
            Err(reason) => errors.push(FieldError::new(&rule.field, reason)),
        }
    }

    if errors.is_empty() {
        Validation::Accepted(NormalizedRecord {
            source_index: row.index,
            values,
        })
    } else {
        Validation::Rejected(errors)
    }
}

fn apply_rule(rule: &FieldRule, raw: Option<&str>) -> Result<Value, String> {
    let outcome = fields::evaluate(&rule.kind, raw);

    match (&rule.kind, outcome) {
        (_, FieldOutcome::Valid(value)) => Ok(value),
        // Phone is never a rejection, whatever the rule says
        (FieldKind::Phone { .. }, _) => Ok(rule.fallback()),
        (FieldKind::Enum { .. }, FieldOutcome::Invalid(reason)) => Err(reason),
        (_, FieldOutcome::Missing) if rule.required => Err("is required".to_string()),
        (_, FieldOutcome::Invalid(reason)) if rule.required => Err(reason),
        (_, FieldOutcome::Missing) | (_, FieldOutcome::Invalid(_)) => Ok(rule.fallback()),
    }
}
