//! SQL value types and row containers for the fetch/transform/insert pipeline.
//!
//! Source rows are decoded into [`SqlValue`]s, normalized by the row transformer,
//! and finally rendered as JSON bound parameters for the destination API.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

/// A single column value as read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value. SQLite has no boolean type, so it is bound as 0/1.
    Bool(bool),

    /// Any integer width, widened to 64 bits.
    Int(i64),

    /// Any floating point or decimal value.
    Float(f64),

    /// Text data.
    Text(String),

    /// Timestamp without timezone (assumed UTC).
    Timestamp(NaiveDateTime),

    /// Timestamp with an explicit offset.
    TimestampTz(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Whether this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render this value as a JSON bound parameter.
    ///
    /// Timestamps that reach this point untransformed are rendered in the
    /// canonical UTC form so the destination never sees a driver-specific format.
    pub fn to_param(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(v) => JsonValue::from(i64::from(*v)),
            SqlValue::Int(v) => JsonValue::from(*v),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Timestamp(ts) => {
                JsonValue::String(crate::transform::canonical_timestamp(&ts.and_utc()))
            }
            SqlValue::TimestampTz(ts) => {
                JsonValue::String(crate::transform::canonical_timestamp(&ts.with_timezone(&Utc)))
            }
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// An immutable row produced by the source, ordered like the profile's column list.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    id: i64,
    values: Vec<SqlValue>,
}

impl SourceRow {
    /// Create a new source row.
    pub fn new(id: i64, values: Vec<SqlValue>) -> Self {
        Self { id, values }
    }

    /// Monotonically increasing row identifier.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Column values in profile order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// A source row after literal normalization; one-to-one with [`SourceRow`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    id: i64,
    values: Vec<SqlValue>,
}

impl TransformedRow {
    pub(crate) fn new(id: i64, values: Vec<SqlValue>) -> Self {
        Self { id, values }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Bound parameters for this row, in column order.
    pub fn params(&self) -> impl Iterator<Item = JsonValue> + '_ {
        self.values.iter().map(SqlValue::to_param)
    }
}

impl From<TransformedRow> for SourceRow {
    fn from(row: TransformedRow) -> Self {
        SourceRow::new(row.id, row.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_param_rendering() {
        assert_eq!(SqlValue::Null.to_param(), JsonValue::Null);
        assert_eq!(SqlValue::Bool(true).to_param(), json!(1));
        assert_eq!(SqlValue::Bool(false).to_param(), json!(0));
        assert_eq!(SqlValue::Int(42).to_param(), json!(42));
        assert_eq!(SqlValue::Float(1.5).to_param(), json!(1.5));
        assert_eq!(SqlValue::from("abc").to_param(), json!("abc"));
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert_eq!(SqlValue::Float(f64::NAN).to_param(), JsonValue::Null);
        assert_eq!(SqlValue::Float(f64::INFINITY).to_param(), JsonValue::Null);
    }

    #[test]
    fn test_untransformed_timestamp_rendered_canonically() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_milli_opt(8, 30, 0, 250)
            .unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_param(),
            json!("2024-03-01T08:30:00.250Z")
        );
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(7i64)), SqlValue::Int(7));
    }
}
