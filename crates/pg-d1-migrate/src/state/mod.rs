//! Checkpoint state.
//!
//! A checkpoint is one contiguous, inclusive ID range of a source table and
//! its processing status. All resume state lives in the checkpoint table; a
//! process keeps nothing between runs.

mod backend;
mod d1;
mod memory;

pub use backend::CheckpointStore;
pub use d1::{D1CheckpointStore, CHECKPOINT_TABLE};
pub use memory::MemoryCheckpointStore;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// Checkpoint status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub const ALL: [CheckpointStatus; 4] = [
        CheckpointStatus::Pending,
        CheckpointStatus::InProgress,
        CheckpointStatus::Completed,
        CheckpointStatus::Failed,
    ];

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }

    /// Whether the processor may claim a checkpoint in this status.
    pub fn is_eligible(&self) -> bool {
        matches!(self, CheckpointStatus::Pending | CheckpointStatus::Failed)
    }

    /// Legal processor transitions. Completed is terminal.
    pub fn can_transition_to(&self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Failed, InProgress) | (InProgress, Completed) | (InProgress, Failed)
        )
    }

    /// Check a transition, naming both ends on failure.
    pub fn check_transition(&self, next: CheckpointStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(MigrateError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(CheckpointStatus::Pending),
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            _ => Err(MigrateError::State(format!("invalid checkpoint status: {}", s))),
        }
    }
}

/// One persisted checkpoint row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identity assigned by the store.
    pub id: i64,
    pub table_name: String,
    /// First source ID of the range (inclusive).
    pub start_id: i64,
    /// Last source ID of the range (inclusive).
    pub end_id: i64,
    /// Rows inserted for this range by the latest attempt.
    pub records_processed: i64,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: Option<String>,
}

impl Checkpoint {
    /// Number of IDs covered by the range.
    pub fn width(&self) -> i64 {
        self.end_id - self.start_id + 1
    }

    /// `[start, end]` label used in logs and errors.
    pub fn range_label(&self) -> String {
        format!("[{}, {}]", self.start_id, self.end_id)
    }
}

/// Checkpoint count per status for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: CheckpointStatus, count: i64) {
        match status {
            CheckpointStatus::Pending => self.pending += count,
            CheckpointStatus::InProgress => self.in_progress += count,
            CheckpointStatus::Completed => self.completed += count,
            CheckpointStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed
    }

    /// Checkpoints the processor would still claim.
    pub fn eligible(&self) -> i64 {
        self.pending + self.failed
    }
}
