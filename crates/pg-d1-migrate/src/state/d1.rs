//! Checkpoint store kept in the destination database itself.
//!
//! Every operation is one statement sent through the [`DestinationGateway`],
//! so checkpoint writes get the same retry policy as data writes.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use super::{Checkpoint, CheckpointStatus, CheckpointStore, StatusCounts};
use crate::destination::{json_i64, DestinationGateway};
use crate::error::{MigrateError, Result};
use crate::transform::canonical_timestamp;

/// Name of the checkpoint table.
pub const CHECKPOINT_TABLE: &str = "migration_checkpoints";

const CHECKPOINT_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS migration_checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        start_id INTEGER NOT NULL,
        end_id INTEGER NOT NULL,
        records_processed INTEGER DEFAULT 0,
        status TEXT NOT NULL CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
        error_message TEXT,
        started_at TEXT,
        completed_at TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_migration_checkpoints_table_status
        ON migration_checkpoints(table_name, status)",
    "CREATE INDEX IF NOT EXISTS idx_migration_checkpoints_table_range
        ON migration_checkpoints(table_name, start_id, end_id)",
];

const SELECT_COLUMNS: &str = "id, table_name, start_id, end_id, records_processed, status, \
     error_message, started_at, completed_at, created_at";

/// D1-backed checkpoint store.
#[derive(Clone)]
pub struct D1CheckpointStore {
    gateway: DestinationGateway,
}

impl D1CheckpointStore {
    pub fn new(gateway: DestinationGateway) -> Self {
        Self { gateway }
    }

    async fn select(&self, filter: &str, params: &[Value]) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            SELECT_COLUMNS, CHECKPOINT_TABLE, filter
        );
        self.gateway
            .execute(&sql, params)
            .await?
            .rows
            .iter()
            .map(checkpoint_from_row)
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for D1CheckpointStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.gateway
            .ensure_table_exists(CHECKPOINT_TABLE, CHECKPOINT_DDL)
            .await?;
        Ok(())
    }

    async fn insert_checkpoint(&self, table: &str, start_id: i64, end_id: i64) -> Result<()> {
        self.gateway
            .execute(
                "INSERT INTO migration_checkpoints (table_name, start_id, end_id, records_processed, status)
                 VALUES (?, ?, ?, 0, 'pending')",
                &[json!(table), json!(start_id), json!(end_id)],
            )
            .await?;
        Ok(())
    }

    async fn count_existing(&self, table: &str) -> Result<i64> {
        self.gateway
            .execute(
                "SELECT COUNT(*) AS count FROM migration_checkpoints WHERE table_name = ?",
                &[json!(table)],
            )
            .await?
            .first_i64("count")
    }

    async fn clear_checkpoints(&self, table: &str) -> Result<u64> {
        let result = self
            .gateway
            .execute(
                "DELETE FROM migration_checkpoints WHERE table_name = ?",
                &[json!(table)],
            )
            .await?;
        Ok(result.changes.unwrap_or(0))
    }

    async fn list_eligible(&self, table: &str) -> Result<Vec<Checkpoint>> {
        self.select(
            "table_name = ? AND status IN ('pending', 'failed') ORDER BY start_id ASC",
            &[json!(table)],
        )
        .await
    }

    async fn list_all(&self, table: &str) -> Result<Vec<Checkpoint>> {
        self.select("table_name = ? ORDER BY start_id ASC", &[json!(table)])
            .await
    }

    async fn last_completed(&self, table: &str) -> Result<Option<Checkpoint>> {
        let mut rows = self
            .select(
                "table_name = ? AND status = 'completed' ORDER BY end_id DESC LIMIT 1",
                &[json!(table)],
            )
            .await?;
        Ok(rows.pop())
    }

    async fn update_status(
        &self,
        checkpoint_id: i64,
        status: CheckpointStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = canonical_timestamp(&Utc::now());
        let stamp_column = match status {
            CheckpointStatus::InProgress => Some("started_at"),
            CheckpointStatus::Completed | CheckpointStatus::Failed => Some("completed_at"),
            CheckpointStatus::Pending => None,
        };

        let mut sql = String::from(
            "UPDATE migration_checkpoints SET status = ?, records_processed = ?, error_message = ?",
        );
        let mut params = vec![
            json!(status.as_str()),
            json!(records_processed),
            json!(error_message),
        ];
        if let Some(column) = stamp_column {
            sql.push_str(&format!(", {} = ?", column));
            params.push(json!(now));
        }
        sql.push_str(" WHERE id = ? AND status != 'completed'");
        params.push(json!(checkpoint_id));

        let result = self.gateway.execute(&sql, &params).await?;
        if result.changes == Some(0) {
            return Err(MigrateError::State(format!(
                "checkpoint {} was not updated to {} (missing or already completed)",
                checkpoint_id, status
            )));
        }
        Ok(())
    }

    async fn status_counts(&self, table: &str) -> Result<StatusCounts> {
        let result = self
            .gateway
            .execute(
                "SELECT status, COUNT(*) AS count FROM migration_checkpoints
                 WHERE table_name = ? GROUP BY status",
                &[json!(table)],
            )
            .await?;

        let mut counts = StatusCounts::default();
        for row in &result.rows {
            let status: CheckpointStatus = required_str(row, "status")?.parse()?;
            counts.add(status, required_i64(row, "count")?);
        }
        Ok(counts)
    }

    async fn reset_in_progress(&self, table: &str) -> Result<u64> {
        let result = self
            .gateway
            .execute(
                "UPDATE migration_checkpoints SET status = 'pending', started_at = NULL
                 WHERE table_name = ? AND status = 'in_progress'",
                &[json!(table)],
            )
            .await?;
        Ok(result.changes.unwrap_or(0))
    }

    fn backend_type(&self) -> &'static str {
        "d1"
    }
}

fn checkpoint_from_row(row: &Map<String, Value>) -> Result<Checkpoint> {
    Ok(Checkpoint {
        id: required_i64(row, "id")?,
        table_name: required_str(row, "table_name")?.to_string(),
        start_id: required_i64(row, "start_id")?,
        end_id: required_i64(row, "end_id")?,
        records_processed: row.get("records_processed").and_then(json_i64).unwrap_or(0),
        status: required_str(row, "status")?.parse()?,
        error_message: optional_str(row, "error_message"),
        started_at: optional_str(row, "started_at"),
        completed_at: optional_str(row, "completed_at"),
        created_at: optional_str(row, "created_at"),
    })
}

fn required_i64(row: &Map<String, Value>, column: &str) -> Result<i64> {
    row.get(column)
        .and_then(json_i64)
        .ok_or_else(|| MigrateError::State(format!("checkpoint row has no integer {}", column)))
}

fn required_str<'a>(row: &'a Map<String, Value>, column: &str) -> Result<&'a str> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| MigrateError::State(format!("checkpoint row has no text {}", column)))
}

fn optional_str(row: &Map<String, Value>, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}
