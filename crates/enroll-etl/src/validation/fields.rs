//! Per-field sanitizers
//!
//! Each function turns an optional raw string into a [`FieldOutcome`]; the
//! caller decides what a missing or malformed value means for the row.

use regex::Regex;
use std::sync::LazyLock;

use super::{FieldKind, FieldOutcome, Value, EMAIL_MAX_LEN, PHONE_MAX_LEN};

/// Email shape accepted both here and by the post-load audit (POSIX-compatible)
pub const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

const HAZARDOUS_CHARS: [char; 4] = ['<', '>', '\'', '"'];

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).expect("email pattern is a valid literal"));

pub(crate) fn evaluate(kind: &FieldKind, raw: Option<&str>) -> FieldOutcome {
    let Some(raw) = raw else {
        return FieldOutcome::Missing;
    };

    match kind {
        FieldKind::String { max_len } => non_empty(sanitize_string(raw, *max_len)),
        FieldKind::Name { max_len } => non_empty(sanitize_name(raw, *max_len)),
        FieldKind::Email { max_len } => email(raw, (*max_len).min(EMAIL_MAX_LEN)),
        FieldKind::Phone { max_len } => {
            non_empty(sanitize_phone(raw, (*max_len).min(PHONE_MAX_LEN)))
        },
        FieldKind::Integer { min, max } => integer(raw, *min, *max),
        FieldKind::Numeric { min, max } => numeric(raw, *min, *max),
        FieldKind::Enum { allowed } => enumeration(raw, allowed),
    }
}

fn non_empty(value: String) -> FieldOutcome {
    if value.is_empty() {
        FieldOutcome::Missing
    } else {
        FieldOutcome::Valid(Value::Text(value))
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect::<String>().trim_end().to_string()
}

/// Trim, drop `< > ' "`, truncate to `max_len` characters
pub fn sanitize_string(raw: &str, max_len: usize) -> String {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !HAZARDOUS_CHARS.contains(c))
        .collect();
    truncate(stripped.trim(), max_len)
}

/// String sanitization plus a word/space/hyphen whitelist and collapsed
/// whitespace
pub fn sanitize_name(raw: &str, max_len: usize) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, max_len)
}

/// Keep digits and `+ - ( )` and spaces, truncate to `max_len`
pub fn sanitize_phone(raw: &str, max_len: usize) -> String {
    let kept: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
        .collect();
    truncate(kept.trim(), max_len)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

fn email(raw: &str, max_len: usize) -> FieldOutcome {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return FieldOutcome::Missing;
    }
    if value.chars().count() > max_len {
        return FieldOutcome::Invalid(format!("must be at most {} characters", max_len));
    }
    if !is_valid_email(&value) {
        return FieldOutcome::Invalid("is not a valid email address".to_string());
    }
    FieldOutcome::Valid(Value::Text(value))
}

/// Parse an integer; whole-valued decimals such as "42.0" are accepted
pub fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let float = trimmed.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
        Some(float as i64)
    } else {
        None
    }
}

pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn range_error<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> Option<String> {
    let below = min.as_ref().is_some_and(|m| value < *m);
    let above = max.as_ref().is_some_and(|m| value > *m);
    match (min, max) {
        (Some(min), Some(max)) if below || above => {
            Some(format!("must be between {} and {}", min, max))
        },
        (Some(min), _) if below => Some(format!("must be at least {}", min)),
        (_, Some(max)) if above => Some(format!("must be at most {}", max)),
        _ => None,
    }
}

fn integer(raw: &str, min: Option<i64>, max: Option<i64>) -> FieldOutcome {
    if raw.trim().is_empty() {
        return FieldOutcome::Missing;
    }
    match parse_integer(raw) {
        None => FieldOutcome::Invalid("must be an integer".to_string()),
        Some(value) => match range_error(value, min, max) {
            Some(reason) => FieldOutcome::Invalid(reason),
            None => FieldOutcome::Valid(Value::Integer(value)),
        },
    }
}

fn numeric(raw: &str, min: Option<f64>, max: Option<f64>) -> FieldOutcome {
    if raw.trim().is_empty() {
        return FieldOutcome::Missing;
    }
    match parse_numeric(raw) {
        None => FieldOutcome::Invalid("must be a number".to_string()),
        Some(value) => match range_error(value, min, max) {
            Some(reason) => FieldOutcome::Invalid(reason),
            None => FieldOutcome::Valid(Value::Float(value)),
        },
    }
}

fn enumeration(raw: &str, allowed: &[String]) -> FieldOutcome {
    let value = raw.trim().to_uppercase();
    if value.is_empty() {
        return FieldOutcome::Missing;
    }
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&value)) {
        FieldOutcome::Valid(Value::Text(value))
    } else {
        FieldOutcome::Invalid(format!("must be one of {}", allowed.join(", ")))
    }
}
