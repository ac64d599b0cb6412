//! In-memory checkpoint store.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{Checkpoint, CheckpointStatus, CheckpointStore, StatusCounts};
use crate::error::{MigrateError, Result};
use crate::transform::canonical_timestamp;

#[derive(Default)]
struct Inner {
    next_id: i64,
    checkpoints: Vec<Checkpoint>,
}

/// Checkpoint store that lives only as long as the process.
///
/// Enforces the same transition rules the processor relies on, so it is
/// stricter than the durable store's `status != 'completed'` guard.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Inner>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a checkpoint's status and progress without transition checks.
    pub async fn force_status(&self, checkpoint_id: i64, status: CheckpointStatus, records: i64) {
        let mut inner = self.inner.lock().await;
        if let Some(cp) = inner.checkpoints.iter_mut().find(|cp| cp.id == checkpoint_id) {
            cp.status = status;
            cp.records_processed = records;
        }
    }
}

fn sorted_by_start(mut checkpoints: Vec<Checkpoint>) -> Vec<Checkpoint> {
    checkpoints.sort_by_key(|cp| cp.start_id);
    checkpoints
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_checkpoint(&self, table: &str, start_id: i64, end_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.checkpoints.push(Checkpoint {
            id,
            table_name: table.to_string(),
            start_id,
            end_id,
            records_processed: 0,
            status: CheckpointStatus::Pending,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Some(canonical_timestamp(&Utc::now())),
        });
        Ok(())
    }

    async fn count_existing(&self, table: &str) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .checkpoints
            .iter()
            .filter(|cp| cp.table_name == table)
            .count() as i64)
    }

    async fn clear_checkpoints(&self, table: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.checkpoints.len();
        inner.checkpoints.retain(|cp| cp.table_name != table);
        Ok((before - inner.checkpoints.len()) as u64)
    }

    async fn list_eligible(&self, table: &str) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.lock().await;
        Ok(sorted_by_start(
            inner
                .checkpoints
                .iter()
                .filter(|cp| cp.table_name == table && cp.status.is_eligible())
                .cloned()
                .collect(),
        ))
    }

    async fn list_all(&self, table: &str) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.lock().await;
        Ok(sorted_by_start(
            inner
                .checkpoints
                .iter()
                .filter(|cp| cp.table_name == table)
                .cloned()
                .collect(),
        ))
    }

    async fn last_completed(&self, table: &str) -> Result<Option<Checkpoint>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .checkpoints
            .iter()
            .filter(|cp| cp.table_name == table && cp.status == CheckpointStatus::Completed)
            .max_by_key(|cp| cp.end_id)
            .cloned())
    }

    async fn update_status(
        &self,
        checkpoint_id: i64,
        status: CheckpointStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let cp = inner
            .checkpoints
            .iter_mut()
            .find(|cp| cp.id == checkpoint_id)
            .ok_or_else(|| MigrateError::State(format!("no checkpoint with id {}", checkpoint_id)))?;

        cp.status.check_transition(status)?;

        let now = canonical_timestamp(&Utc::now());
        cp.status = status;
        cp.records_processed = records_processed;
        cp.error_message = error_message.map(str::to_string);
        match status {
            CheckpointStatus::InProgress => cp.started_at = Some(now),
            CheckpointStatus::Completed | CheckpointStatus::Failed => cp.completed_at = Some(now),
            CheckpointStatus::Pending => {}
        }
        Ok(())
    }

    async fn status_counts(&self, table: &str) -> Result<StatusCounts> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for cp in inner.checkpoints.iter().filter(|cp| cp.table_name == table) {
            counts.add(cp.status, 1);
        }
        Ok(counts)
    }

    async fn reset_in_progress(&self, table: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut reset = 0;
        for cp in inner
            .checkpoints
            .iter_mut()
            .filter(|cp| cp.table_name == table && cp.status == CheckpointStatus::InProgress)
        {
            cp.status = CheckpointStatus::Pending;
            cp.started_at = None;
            reset += 1;
        }
        Ok(reset)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
