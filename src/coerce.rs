use serde_json::{Number, Value};

use crate::domain::DeclaredType;
use crate::error::SheetError;

const QUOTES: &[char] = &['\'', '"'];

/// Converts one raw cell into a JSON value of the given type.
///
/// `column` only labels a [`SheetError::Format`]. Empty cells are the caller's
/// business and should never reach this function.
pub fn coerce(column: &str, raw: &str, declared: DeclaredType) -> Result<Value, SheetError> {
    let trimmed = raw.trim();
    match declared {
        DeclaredType::String => Ok(Value::String(trimmed.to_string())),
        DeclaredType::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format_error(column, raw, declared)),
        DeclaredType::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format_error(column, raw, declared)),
        DeclaredType::Array => Ok(Value::Array(
            split_list(trimmed).into_iter().map(Value::String).collect(),
        )),
    }
}

/// Strips one layer of quote and bracket decoration, then splits on commas.
/// Elements stay strings; an empty list body gives an empty list.
pub fn split_list(raw: &str) -> Vec<String> {
    let unquoted = strip_quotes(raw.trim()).trim();
    let inner = unquoted.strip_prefix('[').unwrap_or(unquoted);
    let inner = inner.strip_suffix(']').unwrap_or(inner);
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|item| item.trim().to_string()).collect()
}

fn strip_quotes(raw: &str) -> &str {
    for quote in QUOTES {
        if let Some(inner) = raw
            .strip_prefix(*quote)
            .and_then(|rest| rest.strip_suffix(*quote))
        {
            return inner;
        }
    }
    raw
}

fn format_error(column: &str, raw: &str, expected: DeclaredType) -> SheetError {
    SheetError::Format {
        column: column.to_string(),
        value: raw.to_string(),
        expected,
    }
}
