//! Row transformer: normalizes source values into literals the destination accepts.
//!
//! Timestamp columns are rewritten to a canonical ISO-8601 UTC string with
//! millisecond precision (`2024-03-01T08:30:00.250Z`) whatever their source
//! representation. NULL stays NULL in nullable columns and is rejected in the
//! others. Every other column passes through.
//! The transform is pure, and re-applying it to its own output is a no-op.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::core::{SourceRow, SqlValue, TransformedRow};
use crate::error::{MigrateError, Result};
use crate::profile::{ColumnDef, ColumnKind};

/// Integer timestamps at or above this magnitude are treated as epoch milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Render a UTC timestamp in the canonical destination form.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalize every timestamp column of `row` according to `columns`.
pub fn normalize_timestamps(columns: &[ColumnDef], row: &SourceRow) -> Result<TransformedRow> {
    if columns.len() != row.values().len() {
        return Err(MigrateError::Transform {
            column: "*".to_string(),
            message: format!(
                "row {} has {} values, expected {}",
                row.id(),
                row.values().len(),
                columns.len()
            ),
        });
    }

    let values = columns
        .iter()
        .zip(row.values())
        .map(|(column, value)| {
            if value.is_null() && !column.nullable {
                return Err(MigrateError::Transform {
                    column: column.name.to_string(),
                    message: format!("row {} has NULL in a NOT NULL column", row.id()),
                });
            }
            match column.kind {
                ColumnKind::Timestamp => normalize_timestamp(column.name, value),
                _ => Ok(value.clone()),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TransformedRow::new(row.id(), values))
}

/// Normalize a single timestamp value.
pub fn normalize_timestamp(column: &str, value: &SqlValue) -> Result<SqlValue> {
    let ts = match value {
        SqlValue::Null => return Ok(SqlValue::Null),
        SqlValue::Timestamp(naive) => naive.and_utc(),
        SqlValue::TimestampTz(ts) => ts.with_timezone(&Utc),
        SqlValue::Text(text) => parse_timestamp_text(text).ok_or_else(|| MigrateError::Transform {
            column: column.to_string(),
            message: format!("unrecognized timestamp '{}'", text),
        })?,
        SqlValue::Int(epoch) => from_epoch(*epoch).ok_or_else(|| MigrateError::Transform {
            column: column.to_string(),
            message: format!("epoch value {} out of range", epoch),
        })?,
        other => {
            return Err(MigrateError::Transform {
                column: column.to_string(),
                message: format!("cannot interpret {:?} as a timestamp", other),
            })
        }
    };

    Ok(SqlValue::Text(canonical_timestamp(&ts)))
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    // PostgreSQL text output for timestamptz, e.g. "2024-03-01 08:30:00.25+00"
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}
