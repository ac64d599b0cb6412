//! Checkpoint planner.
//!
//! Splits `[min_id, max_id]` of the source table into contiguous inclusive
//! windows and records one pending checkpoint per window. Existing
//! checkpoints are the resume state: with resume on they are left untouched.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;
use crate::source::{RowSource, TableStats};
use crate::state::{Checkpoint, CheckpointStore};

/// Contiguous inclusive windows of width `size` covering `[min_id, max_id]`.
/// The last window may be narrower.
pub fn partition_ranges(min_id: i64, max_id: i64, size: i64) -> Vec<(i64, i64)> {
    let mut ranges = Vec::new();
    if size < 1 || min_id > max_id {
        return ranges;
    }

    let mut start = min_id;
    loop {
        let end = start.saturating_add(size - 1).min(max_id);
        ranges.push((start, end));
        if end >= max_id {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// What planning did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// Source table is empty; nothing recorded.
    EmptySource,
    /// Checkpoints already existed and were kept.
    Resumed,
    /// No checkpoints existed; a fresh plan was recorded.
    Created,
    /// Existing checkpoints were discarded and the table replanned.
    Replanned,
}

/// Result of one planning pass.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub table: String,
    pub stats: TableStats,
    pub action: PlanAction,
    /// Checkpoints present before planning.
    pub existing: i64,
    /// Checkpoints recorded by this pass.
    pub created: usize,
}

pub struct CheckpointPlanner {
    source: Arc<dyn RowSource>,
    store: Arc<dyn CheckpointStore>,
    profile: TableProfile,
    checkpoint_size: i64,
}

impl CheckpointPlanner {
    pub fn new(
        source: Arc<dyn RowSource>,
        store: Arc<dyn CheckpointStore>,
        profile: TableProfile,
        checkpoint_size: i64,
    ) -> Self {
        Self {
            source,
            store,
            profile,
            checkpoint_size,
        }
    }

    /// Make sure checkpoints exist for the table.
    pub async fn plan(&self, resume: bool) -> Result<PlanOutcome> {
        let table = self.profile.table_name();
        let stats = self.source.table_stats(self.profile).await?;
        info!(
            "Source {}: {} rows, ids {:?}..{:?}",
            table, stats.count, stats.min_id, stats.max_id
        );

        let mut outcome = PlanOutcome {
            table: table.to_string(),
            stats,
            action: PlanAction::EmptySource,
            existing: 0,
            created: 0,
        };

        if stats.count == 0 {
            info!("Source table {} is empty, nothing to plan", table);
            return Ok(outcome);
        }
        let (min_id, max_id) = match (stats.min_id, stats.max_id) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                return Err(MigrateError::State(format!(
                    "source reports {} rows in {} but no id bounds",
                    stats.count, table
                )))
            }
        };

        self.store.ensure_schema().await?;

        outcome.existing = self.store.count_existing(table).await?;
        if outcome.existing > 0 {
            if resume {
                info!(
                    "Resuming {}: {} checkpoints already planned",
                    table, outcome.existing
                );
                self.check_coverage(min_id, max_id).await?;
                outcome.action = PlanAction::Resumed;
                return Ok(outcome);
            }
            let cleared = self.store.clear_checkpoints(table).await?;
            warn!(
                "Resume disabled: discarded {} existing checkpoints for {}",
                cleared, table
            );
            outcome.action = PlanAction::Replanned;
        } else {
            outcome.action = PlanAction::Created;
        }

        let ranges = partition_ranges(min_id, max_id, self.checkpoint_size);
        for (start, end) in &ranges {
            self.store.insert_checkpoint(table, *start, *end).await?;
        }
        outcome.created = ranges.len();

        info!(
            "Planned {} checkpoints of width {} for {} [{}, {}]",
            ranges.len(),
            self.checkpoint_size,
            table,
            min_id,
            max_id
        );
        Ok(outcome)
    }

    /// Warn when kept checkpoints no longer cover the source id range.
    async fn check_coverage(&self, min_id: i64, max_id: i64) -> Result<()> {
        let checkpoints = self.store.list_all(self.profile.table_name()).await?;
        if let Some(gap) = find_gap(&checkpoints, min_id, max_id) {
            warn!(
                "Existing checkpoints for {} do not cover the source ids: {}. \
                 Rerun with resume disabled to replan.",
                self.profile, gap
            );
        }
        Ok(())
    }
}

/// Describe the first hole or overlap in `checkpoints` (sorted by `start_id`)
/// relative to `[min_id, max_id]`.
fn find_gap(checkpoints: &[Checkpoint], min_id: i64, max_id: i64) -> Option<String> {
    let first = checkpoints.first()?;
    if first.start_id > min_id {
        return Some(format!("ids from {} are not planned", min_id));
    }

    let mut covered_to = first.end_id;
    for cp in &checkpoints[1..] {
        if cp.start_id != covered_to + 1 {
            return Some(format!(
                "range {} does not follow id {}",
                cp.range_label(),
                covered_to
            ));
        }
        covered_to = cp.end_id;
    }

    if covered_to < max_id {
        return Some(format!("ids after {} are not planned", covered_to));
    }
    None
}
