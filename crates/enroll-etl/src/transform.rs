//! Row selection and validation
//!
//! Splits extracted rows into accepted records and per-row rejections. A
//! rejection never stops the batch.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::{RawRow, StatusMarker};
use crate::validation::{validate_row, FieldError, NormalizedRecord, RuleSet, Validation};

/// A row that failed validation, keyed by its source index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    pub index: usize,
    pub errors: Vec<FieldError>,
}

impl RowRejection {
    /// All field errors joined for the status column: `email: is required; age: ...`
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub records: Vec<NormalizedRecord>,
    pub rejections: Vec<RowRejection>,
    /// Rows not selected for processing (status other than pending)
    pub skipped: usize,
}

impl TransformOutput {
    pub fn processed(&self) -> usize {
        self.records.len() + self.rejections.len()
    }
}

/// Validate rows in source order
///
/// With `pending_only`, rows whose status marker is not `pending` are
/// skipped without validation.
pub fn transform(rows: &[RawRow], rules: &RuleSet, pending_only: bool) -> TransformOutput {
    let mut output = TransformOutput::default();

    for row in rows {
        if pending_only && !StatusMarker::is_pending(row.status.as_deref()) {
            output.skipped += 1;
            continue;
        }

        match validate_row(row, rules) {
            Validation::Accepted(record) => output.records.push(record),
            Validation::Rejected(errors) => {
                let rejection = RowRejection {
                    index: row.index,
                    errors,
                };
                debug!(row = row.index, reason = %rejection.message(), "Row rejected");
                output.rejections.push(rejection);
            },
        }
    }

    output
}
