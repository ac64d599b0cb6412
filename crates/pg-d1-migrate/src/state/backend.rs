//! Checkpoint store trait.
//!
//! The processor and planner work against `Arc<dyn CheckpointStore>`:
//!
//! - **D1**: [`D1CheckpointStore`](super::D1CheckpointStore), the durable store
//!   living next to the migrated data
//! - **Memory**: [`MemoryCheckpointStore`](super::MemoryCheckpointStore), used
//!   for dry-run planning and tests

use async_trait::async_trait;

use super::{Checkpoint, CheckpointStatus, StatusCounts};
use crate::error::Result;

/// Persistence for checkpoint rows.
///
/// Only one process should write a given table's checkpoints at a time; no
/// operation here is an atomic claim.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create the checkpoint table and its indexes if missing. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Append one `pending` checkpoint.
    async fn insert_checkpoint(&self, table: &str, start_id: i64, end_id: i64) -> Result<()>;

    /// Number of checkpoints recorded for `table`.
    async fn count_existing(&self, table: &str) -> Result<i64>;

    /// Delete every checkpoint of `table`. Irreversible.
    async fn clear_checkpoints(&self, table: &str) -> Result<u64>;

    /// Pending and failed checkpoints, ordered by `start_id` ascending.
    async fn list_eligible(&self, table: &str) -> Result<Vec<Checkpoint>>;

    /// Every checkpoint of `table`, ordered by `start_id` ascending.
    async fn list_all(&self, table: &str) -> Result<Vec<Checkpoint>>;

    /// Completed checkpoint with the highest `end_id`. Informational only.
    async fn last_completed(&self, table: &str) -> Result<Option<Checkpoint>>;

    /// Set status and progress. `in_progress` stamps `started_at`;
    /// `completed` and `failed` stamp `completed_at`. A completed
    /// checkpoint is never updated.
    async fn update_status(
        &self,
        checkpoint_id: i64,
        status: CheckpointStatus,
        records_processed: i64,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Checkpoint count per status.
    async fn status_counts(&self, table: &str) -> Result<StatusCounts>;

    /// Move stuck `in_progress` checkpoints back to `pending`.
    async fn reset_in_progress(&self, table: &str) -> Result<u64>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}
