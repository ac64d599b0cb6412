//! Destination gateway.
//!
//! Every statement sent to the destination goes through [`DestinationGateway`],
//! which wraps a [`QueryTransport`] with the configured [`RetryPolicy`] and
//! knows how to bootstrap missing tables and build multi-row inserts that
//! stay under the bound-parameter ceiling.

mod d1;
mod retry;

pub use d1::D1Client;
pub use retry::{call_with_retry, RetryPolicy};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::TransformedRow;
use crate::error::{MigrateError, Result};

/// Rows and metadata returned by one destination query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result rows as column-name to value maps.
    pub rows: Vec<Map<String, Value>>,
    /// Rows changed by the statement, when reported.
    pub changes: Option<u64>,
    /// Rowid of the last inserted row, when reported.
    pub last_row_id: Option<i64>,
}

impl QueryResult {
    /// Integer value of `column` in the first row.
    pub fn first_i64(&self, column: &str) -> Result<i64> {
        self.rows
            .first()
            .and_then(|row| row.get(column))
            .and_then(json_i64)
            .ok_or_else(|| {
                MigrateError::remote(None, format!("response has no integer column '{}'", column))
            })
    }
}

/// Read an integer from a JSON value, accepting integral floats and numeric strings.
pub(crate) fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// One round trip to the destination: a single SQL statement with bound parameters.
///
/// Implementations report both transport failures (non-2xx, malformed body)
/// and application failures (`success: false`) as [`MigrateError::Remote`]
/// or [`MigrateError::Http`]. They never retry; retries belong to the gateway.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Execute one statement.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Short name used in logs and health output.
    fn name(&self) -> &str;
}

/// Retrying, parameter-aware access to the destination.
#[derive(Clone)]
pub struct DestinationGateway {
    transport: Arc<dyn QueryTransport>,
    retry: RetryPolicy,
    max_bound_params: usize,
}

impl DestinationGateway {
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        retry: RetryPolicy,
        max_bound_params: usize,
    ) -> Self {
        Self {
            transport,
            retry,
            max_bound_params,
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Execute a statement, retrying every failure per the policy.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.check_param_count(params.len())?;
        call_with_retry(&self.retry, "destination query", |_| true, move || {
            self.transport.execute(sql, params)
        })
        .await
    }

    /// Single attempt with no retry, for liveness checks.
    pub async fn ping(&self) -> Result<()> {
        self.transport.execute("SELECT 1", &[]).await.map(|_| ())
    }

    /// Whether `table` exists, probed with a trivial read.
    ///
    /// A missing-relation failure answers `false` immediately; any other
    /// failure is retried and then propagated.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", quote_ident(table));
        let sql = sql.as_str();
        let probe = call_with_retry(
            &self.retry,
            "table probe",
            |e| !e.is_missing_relation(),
            move || self.transport.execute(sql, &[]),
        )
        .await;

        match probe {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing_relation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `table` from `ddl` (table statement then indexes) if it is missing.
    ///
    /// Returns whether the DDL was applied.
    pub async fn ensure_table_exists(&self, table: &str, ddl: &[&str]) -> Result<bool> {
        if self.table_exists(table).await? {
            debug!("Destination table {} exists", table);
            return Ok(false);
        }

        info!("Creating destination table {}", table);
        for statement in ddl {
            self.execute(statement, &[]).await?;
        }
        Ok(true)
    }

    /// Total rows in `table`.
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", quote_ident(table));
        self.execute(&sql, &[]).await?.first_i64("count")
    }

    /// Insert `rows` into `table` as one multi-row statement.
    ///
    /// The caller sizes the batch; exceeding the parameter ceiling is an error.
    pub async fn insert_batch(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[TransformedRow],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = build_insert_sql(table, columns, rows.len());
        let mut params = Vec::with_capacity(rows.len() * columns.len());
        for row in rows {
            if row.values().len() != columns.len() {
                return Err(MigrateError::Transform {
                    column: "*".to_string(),
                    message: format!(
                        "row {} has {} values for {} columns",
                        row.id(),
                        row.values().len(),
                        columns.len()
                    ),
                });
            }
            params.extend(row.params());
        }

        self.execute(&sql, &params).await?;
        Ok(rows.len() as u64)
    }

    fn check_param_count(&self, count: usize) -> Result<()> {
        if count > self.max_bound_params {
            return Err(MigrateError::Config(format!(
                "statement binds {} parameters, destination limit is {}",
                count, self.max_bound_params
            )));
        }
        Ok(())
    }
}

/// Quote an identifier for the destination.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)` for `row_count` rows.
pub(crate) fn build_insert_sql(table: &str, columns: &[&str], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholders; row_count].join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        column_list,
        values
    )
}
