//! Checkpoint processor.
//!
//! Claims one eligible checkpoint at a time, fetches its ID range from the
//! source, transforms the rows, inserts them in parameter-bounded sub-batches
//! and records the outcome. A checkpoint is always marked `in_progress`
//! before any work for it starts, so a crash leaves it visibly stuck rather
//! than silently skipped.
//!
//! Sub-batch inserts are not transactional. A checkpoint that fails part way
//! through is reprocessed from its `start_id` on the next run, and rows
//! inserted by the failed attempt are inserted again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FailurePolicy;
use crate::core::TransformedRow;
use crate::destination::DestinationGateway;
use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;
use crate::source::RowSource;
use crate::state::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::verify::{verify_counts, VerificationReport};

/// Tuning for one processor run.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    /// Rows per insert call, already clamped to the parameter ceiling.
    pub batch_rows: usize,
    /// Pause between consecutive sub-batch inserts.
    pub inter_batch_delay: Duration,
    /// Probe the source every N sub-batches.
    pub probe_interval: usize,
    pub failure_policy: FailurePolicy,
}

/// Result of one processor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub table: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Rows inserted by this run, summed over its checkpoints.
    pub rows_processed: i64,
    pub rows_per_second: i64,
    pub batch_size: usize,
    pub checkpoints_completed: usize,
    pub checkpoints_failed: usize,
    /// One line per failed checkpoint (range and upstream error).
    pub failures: Vec<String>,
    /// Present when no eligible checkpoints remained at the end of the run.
    pub verification: Option<VerificationReport>,
}

impl RunSummary {
    fn new(table: &str, batch_size: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            table: table.to_string(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            rows_processed: 0,
            rows_per_second: 0,
            batch_size,
            checkpoints_completed: 0,
            checkpoints_failed: 0,
            failures: Vec::new(),
            verification: None,
        }
    }

    fn finish(&mut self, elapsed: Duration) {
        self.completed_at = Utc::now();
        self.duration_seconds = elapsed.as_secs_f64();
        self.rows_per_second = if self.duration_seconds > 0.0 {
            (self.rows_processed as f64 / self.duration_seconds) as i64
        } else {
            0
        };
    }

    /// Whether the final verification found a row-count mismatch.
    pub fn has_mismatch(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| !v.matches)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct CheckpointProcessor {
    source: Arc<dyn RowSource>,
    gateway: DestinationGateway,
    store: Arc<dyn CheckpointStore>,
    profile: TableProfile,
    settings: ProcessorSettings,
}

impl CheckpointProcessor {
    pub fn new(
        source: Arc<dyn RowSource>,
        gateway: DestinationGateway,
        store: Arc<dyn CheckpointStore>,
        profile: TableProfile,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            source,
            gateway,
            store,
            profile,
            settings,
        }
    }

    /// Process every eligible checkpoint in `start_id` order.
    ///
    /// With [`FailurePolicy::Abort`] the first failed checkpoint ends the run
    /// with its error. With [`FailurePolicy::Continue`] later checkpoints are
    /// still processed and all failures are returned together. Cancellation
    /// is honoured between checkpoints only.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let table = self.profile.table_name();
        let timer = Instant::now();
        let mut summary = RunSummary::new(table, self.settings.batch_rows);
        info!("Starting run {} for {}", summary.run_id, table);

        self.gateway
            .ensure_table_exists(table, self.profile.ddl())
            .await?;
        // The planner skips schema creation for an empty source.
        self.store.ensure_schema().await?;
        self.report_prior_state().await?;

        let eligible = self.store.list_eligible(table).await?;
        info!("{} eligible checkpoints for {}", eligible.len(), table);

        for checkpoint in &eligible {
            if cancel.is_cancelled() {
                warn!(
                    "Stopping before checkpoint {} {}: cancellation requested ({} rows processed this run)",
                    checkpoint.id,
                    checkpoint.range_label(),
                    summary.rows_processed
                );
                return Err(MigrateError::Cancelled);
            }

            match self.process_checkpoint(checkpoint).await {
                Ok(records) => {
                    summary.rows_processed += records;
                    summary.checkpoints_completed += 1;
                }
                Err(e) => {
                    summary.checkpoints_failed += 1;
                    match self.settings.failure_policy {
                        FailurePolicy::Abort => return Err(e),
                        FailurePolicy::Continue => summary.failures.push(e.to_string()),
                    }
                }
            }
        }

        if !summary.failures.is_empty() {
            return Err(MigrateError::CheckpointsFailed {
                table: table.to_string(),
                failures: summary.failures,
            });
        }

        if self.store.list_eligible(table).await?.is_empty() {
            let report = verify_counts(self.source.as_ref(), &self.gateway, self.profile).await?;
            summary.verification = Some(report);
        }

        summary.finish(timer.elapsed());
        info!(
            "Run {} finished: {} rows in {} checkpoints ({:.2}s)",
            summary.run_id,
            summary.rows_processed,
            summary.checkpoints_completed,
            summary.duration_seconds
        );
        Ok(summary)
    }

    async fn report_prior_state(&self) -> Result<()> {
        let table = self.profile.table_name();
        let counts = self.store.status_counts(table).await?;
        if counts.in_progress > 0 {
            warn!(
                "{} checkpoints of {} are stuck in_progress from an interrupted run and will \
                 not be processed; reset them to pending to retry",
                counts.in_progress, table
            );
        }
        if counts.total() > 0 {
            info!(
                "Resuming {}: {} of {} checkpoints eligible",
                table,
                counts.eligible(),
                counts.total()
            );
        }
        if let Some(last) = self.store.last_completed(table).await? {
            info!(
                "Last completed checkpoint of {}: {} ({} of {} checkpoints completed)",
                table,
                last.range_label(),
                counts.completed,
                counts.total()
            );
        }
        Ok(())
    }

    /// Claim, transfer and close one checkpoint. Returns rows inserted.
    async fn process_checkpoint(&self, checkpoint: &Checkpoint) -> Result<i64> {
        let table = self.profile.table_name();
        let range_error = |message: String| {
            MigrateError::checkpoint(table, checkpoint.start_id, checkpoint.end_id, message)
        };
        checkpoint.status.check_transition(CheckpointStatus::InProgress)?;
        self.store
            .update_status(checkpoint.id, CheckpointStatus::InProgress, 0, None)
            .await
            .map_err(|e| range_error(format!("could not claim checkpoint: {}", e)))?;
        info!(
            "Checkpoint {} {} of {}: in_progress",
            checkpoint.id,
            checkpoint.range_label(),
            table
        );

        let mut inserted = 0i64;
        match self.transfer_range(checkpoint, &mut inserted).await {
            Ok(()) => {
                self.store
                    .update_status(checkpoint.id, CheckpointStatus::Completed, inserted, None)
                    .await
                    .map_err(|e| {
                        range_error(format!(
                            "{} rows inserted but marking the checkpoint completed failed, \
                             it may be left in_progress: {}",
                            inserted, e
                        ))
                    })?;
                info!(
                    "Checkpoint {} {} of {}: completed ({} rows)",
                    checkpoint.id,
                    checkpoint.range_label(),
                    table,
                    inserted
                );
                Ok(inserted)
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    "Checkpoint {} {} of {}: failed after {} rows: {}",
                    checkpoint.id,
                    checkpoint.range_label(),
                    table,
                    inserted,
                    message
                );
                match self
                    .store
                    .update_status(
                        checkpoint.id,
                        CheckpointStatus::Failed,
                        inserted,
                        Some(&message),
                    )
                    .await
                {
                    Ok(()) => Err(range_error(message)),
                    Err(mark_err) => {
                        error!(
                            "Could not record failure of checkpoint {}: {}",
                            checkpoint.id, mark_err
                        );
                        Err(range_error(format!(
                            "{}; marking the checkpoint failed also failed, it may be left \
                             in_progress: {}",
                            message, mark_err
                        )))
                    }
                }
            }
        }
    }

    async fn transfer_range(&self, checkpoint: &Checkpoint, inserted: &mut i64) -> Result<()> {
        let table = self.profile.table_name();
        self.source.ensure_connected().await?;

        let rows = self
            .source
            .query_range(self.profile, checkpoint.start_id, checkpoint.end_id)
            .await?;
        if rows.len() as i64 > checkpoint.width() {
            return Err(MigrateError::State(format!(
                "source returned {} rows for a range of width {}",
                rows.len(),
                checkpoint.width()
            )));
        }
        if rows.is_empty() {
            debug!("No source rows in {}", checkpoint.range_label());
            return Ok(());
        }

        let transformed = rows
            .iter()
            .map(|row| self.profile.transform(row))
            .collect::<Result<Vec<TransformedRow>>>()?;
        let columns = self.profile.column_names();

        for (index, chunk) in transformed.chunks(self.settings.batch_rows.max(1)).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.inter_batch_delay).await;
                if index % self.settings.probe_interval.max(1) == 0 {
                    if let Err(e) = self.source.ensure_connected().await {
                        debug!("Periodic source probe failed (ignored): {}", e);
                    }
                }
            }

            let count = self.gateway.insert_batch(table, &columns, chunk).await?;
            *inserted += count as i64;
            debug!(
                "Checkpoint {}: sub-batch {} inserted {} rows ({} total)",
                checkpoint.id,
                index + 1,
                count,
                inserted
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::RetryPolicy;
    use crate::planner::CheckpointPlanner;
    use crate::state::{D1CheckpointStore, MemoryCheckpointStore};
    use crate::testing::{camera_rows, MemorySource, ScriptedTransport};

    const TABLE: &str = "camera_locations";

    struct Harness {
        source: Arc<MemorySource>,
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryCheckpointStore>,
    }

    impl Harness {
        fn new(source: MemorySource) -> Self {
            Self::with_transport(source, ScriptedTransport::new())
        }

        fn with_transport(source: MemorySource, transport: ScriptedTransport) -> Self {
            Self {
                source: Arc::new(source),
                transport: Arc::new(transport),
                store: Arc::new(MemoryCheckpointStore::new()),
            }
        }

        async fn plan(&self, checkpoint_size: i64) {
            CheckpointPlanner::new(
                self.source.clone(),
                self.store.clone(),
                TableProfile::CameraLocations,
                checkpoint_size,
            )
            .plan(true)
            .await
            .unwrap();
        }

        fn processor(&self, batch_rows: usize, policy: FailurePolicy) -> CheckpointProcessor {
            self.processor_checking_every(batch_rows, policy, 100)
        }

        fn processor_checking_every(
            &self,
            batch_rows: usize,
            policy: FailurePolicy,
            check_every: usize,
        ) -> CheckpointProcessor {
            CheckpointProcessor::new(
                self.source.clone(),
                DestinationGateway::new(self.transport.clone(), RetryPolicy::default(), 99),
                self.store.clone(),
                TableProfile::CameraLocations,
                ProcessorSettings {
                    batch_rows,
                    inter_batch_delay: Duration::from_millis(200),
                    probe_interval: check_every,
                    failure_policy: policy,
                },
            )
        }

        async fn run(&self, batch_rows: usize) -> Result<RunSummary> {
            self.processor(batch_rows, FailurePolicy::Abort)
                .run(&CancellationToken::new())
                .await
        }

        async fn checkpoints(&self) -> Vec<Checkpoint> {
            self.store.list_all(TABLE).await.unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_35_rows_two_checkpoints_batches_of_16() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;

        let summary = h.run(16).await.unwrap();

        assert_eq!(summary.rows_processed, 35);
        assert_eq!(summary.checkpoints_completed, 2);
        assert_eq!(h.transport.insert_batch_sizes(TABLE), vec![16, 4, 16, 3]);
        assert_eq!(h.transport.inserted_ids(TABLE), (1..=35).collect::<Vec<_>>());
        assert_eq!(h.source.fetches(), vec![(1, 20), (21, 35)]);

        let checkpoints = h.checkpoints().await;
        assert!(checkpoints
            .iter()
            .all(|cp| cp.status == CheckpointStatus::Completed));
        assert_eq!(checkpoints[0].records_processed, 20);
        assert_eq!(checkpoints[1].records_processed, 15);

        let verification = summary.verification.unwrap();
        assert!(verification.matches);
        assert_eq!(verification.target_count, 35);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamps_are_canonical_on_the_wire() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=2)));
        h.plan(20).await;
        h.run(16).await.unwrap();

        let insert = h
            .transport
            .calls()
            .into_iter()
            .find(|(sql, _)| sql.starts_with("INSERT INTO \"camera_locations\""))
            .unwrap();
        assert_eq!(insert.1[5], serde_json::json!("2024-03-01T08:30:00.000Z"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_batch_delay_between_sub_batches() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=20)));
        h.plan(20).await;

        let start = tokio::time::Instant::now();
        h.run(5).await.unwrap();

        // four sub-batches, three pauses
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_third_sub_batch_then_rerun_duplicates_rows() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;
        // first two sub-batch inserts succeed, every attempt at the third fails
        h.transport
            .fail_matching_after("INSERT INTO \"camera_locations\"", 2, 3, "HTTP 503 upstream");

        let err = h.run(5).await.unwrap_err();
        assert!(matches!(err, MigrateError::Checkpoint { start_id: 1, end_id: 20, .. }));
        assert!(err.to_string().contains("HTTP 503 upstream"));

        let checkpoints = h.checkpoints().await;
        assert_eq!(checkpoints[0].status, CheckpointStatus::Failed);
        assert_eq!(checkpoints[0].records_processed, 10);
        assert!(checkpoints[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("HTTP 503 upstream"));
        // abort policy: the second checkpoint was never claimed
        assert_eq!(checkpoints[1].status, CheckpointStatus::Pending);
        assert_eq!(h.transport.inserted_ids(TABLE), (1..=10).collect::<Vec<_>>());

        let summary = h.run(5).await.unwrap();

        // the failed checkpoint restarts at its start_id, not at the third sub-batch
        assert_eq!(h.source.fetches(), vec![(1, 20), (1, 20), (21, 35)]);
        let ids = h.transport.inserted_ids(TABLE);
        assert_eq!(ids.len(), 45);
        assert_eq!(ids.iter().filter(|id| **id <= 10).count(), 20);
        // the duplicates surface as a verification mismatch
        assert_eq!(summary.rows_processed, 35);
        assert!(summary.has_mismatch());
        let verification = summary.verification.unwrap();
        assert_eq!(verification.source_count, 35);
        assert_eq!(verification.target_count, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_with_duplicates_on_a_freshly_created_table() {
        // the destination enforces whatever keys the created table declares
        let h = Harness::with_transport(
            MemorySource::new(camera_rows(1..=35)),
            ScriptedTransport::with_schema(),
        );
        h.plan(20).await;
        h.transport
            .fail_matching_after("INSERT INTO \"camera_locations\"", 2, 3, "HTTP 503 upstream");

        assert!(h.run(5).await.is_err());
        assert!(h
            .transport
            .statements()
            .iter()
            .any(|sql| sql.starts_with("CREATE TABLE IF NOT EXISTS camera_locations")));
        assert_eq!(h.transport.inserted_ids(TABLE), (1..=10).collect::<Vec<_>>());

        let summary = h.run(5).await.unwrap();

        assert_eq!(h.transport.inserted_ids(TABLE).len(), 45);
        assert!(h
            .checkpoints()
            .await
            .iter()
            .all(|cp| cp.status == CheckpointStatus::Completed));
        let verification = summary.verification.unwrap();
        assert_eq!(verification.target_count, 45);
        assert!(!verification.matches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_checked_every_second_sub_batch() {
        // the first check (before the fetch) passes, the periodic ones fail
        let h = Harness::new(
            MemorySource::new(camera_rows(1..=25))
                .with_failing_pings_after(1, 2)
                .with_failing_reconnect(),
        );
        h.plan(25).await;

        let start = tokio::time::Instant::now();
        let summary = h
            .processor_checking_every(5, FailurePolicy::Abort, 2)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        // five sub-batches 200ms apart: checks before the fetch and before
        // sub-batches 3 and 5
        let offsets: Vec<Duration> = h
            .source
            .ping_times()
            .into_iter()
            .map(|t| t.duration_since(start))
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(400),
                Duration::from_millis(800)
            ]
        );
        // both periodic checks failed and could not reconnect
        assert_eq!(h.source.reconnects(), 2);

        assert_eq!(summary.rows_processed, 25);
        assert_eq!(h.transport.insert_batch_sizes(TABLE), vec![5; 5]);
        let checkpoints = h.checkpoints().await;
        assert_eq!(checkpoints[0].status, CheckpointStatus::Completed);
        assert_eq!(checkpoints[0].records_processed, 25);
    }

    fn d1_processor(
        source: Arc<MemorySource>,
        transport: Arc<ScriptedTransport>,
        policy: FailurePolicy,
    ) -> CheckpointProcessor {
        let gateway = DestinationGateway::new(transport, RetryPolicy::default(), 99);
        CheckpointProcessor::new(
            source,
            gateway.clone(),
            Arc::new(D1CheckpointStore::new(gateway)),
            TableProfile::CameraLocations,
            ProcessorSettings {
                batch_rows: 16,
                inter_batch_delay: Duration::from_millis(200),
                probe_interval: 100,
                failure_policy: policy,
            },
        )
    }

    fn pending_checkpoint_1_to_20(transport: &ScriptedTransport) {
        transport.respond_matching(
            "status IN ('pending', 'failed')",
            vec![serde_json::json!({
                "id": 1,
                "table_name": TABLE,
                "start_id": 1,
                "end_id": 20,
                "records_processed": 0,
                "status": "pending",
            })],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_not_recorded_is_a_range_failure() {
        let source = Arc::new(MemorySource::new(camera_rows(1..=20)));
        let transport = Arc::new(ScriptedTransport::new());
        pending_checkpoint_1_to_20(&transport);
        transport.fail_matching("completed_at = ?", "D1 overloaded");

        let err = d1_processor(source, transport.clone(), FailurePolicy::Continue)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        // the rows reached the destination before the status write failed
        assert_eq!(transport.inserted_ids(TABLE).len(), 20);
        match err {
            MigrateError::CheckpointsFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("[1, 20]"), "{}", failures[0]);
                assert!(failures[0].contains("in_progress"));
                assert!(failures[0].contains("D1 overloaded"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_not_recorded_is_reported_with_the_cause() {
        let source = Arc::new(MemorySource::new(camera_rows(1..=20)));
        let transport = Arc::new(ScriptedTransport::new());
        pending_checkpoint_1_to_20(&transport);
        transport.fail_matching("INSERT INTO \"camera_locations\"", "HTTP 503 upstream");
        transport.fail_matching("completed_at = ?", "D1 overloaded");

        let err = d1_processor(source, transport, FailurePolicy::Abort)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Checkpoint { start_id: 1, end_id: 20, .. }));
        let message = err.to_string();
        assert!(message.contains("HTTP 503 upstream"));
        assert!(message.contains("D1 overloaded"));
        assert!(message.contains("in_progress"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_insert_error_is_retried_within_checkpoint() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=20)));
        h.plan(20).await;
        h.transport
            .fail_matching_after("INSERT INTO \"camera_locations\"", 0, 2, "success=false");

        let summary = h.run(16).await.unwrap();

        assert_eq!(summary.rows_processed, 20);
        assert_eq!(h.transport.inserted_ids(TABLE).len(), 20);
        assert_eq!(h.checkpoints().await[0].status, CheckpointStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_range_completes_with_zero_rows() {
        let h = Harness::new(MemorySource::new(camera_rows([1, 2, 3, 95, 96])));
        h.plan(20).await;

        let summary = h.run(16).await.unwrap();

        let checkpoints = h.checkpoints().await;
        assert_eq!(checkpoints.len(), 5);
        for cp in &checkpoints[1..4] {
            assert_eq!(cp.status, CheckpointStatus::Completed);
            assert_eq!(cp.records_processed, 0);
        }
        assert_eq!(summary.rows_processed, 5);
        assert!(!summary.has_mismatch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_marked_complete_without_rows_is_detected() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;
        let second = h.checkpoints().await[1].id;
        h.store.force_status(second, CheckpointStatus::Completed, 15).await;

        let summary = h.run(16).await.unwrap();

        let verification = summary.verification.unwrap();
        assert!(!verification.matches);
        assert_eq!(verification.target_count, 20);
        assert!(verification.mismatch_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_eligible_only_verifies() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;
        h.run(16).await.unwrap();
        let calls_before = h.transport.calls().len();

        let summary = h.run(16).await.unwrap();

        assert_eq!(summary.rows_processed, 0);
        assert_eq!(summary.checkpoints_completed, 0);
        assert!(summary.verification.unwrap().matches);
        assert!(!h.transport.calls()[calls_before..]
            .iter()
            .any(|(sql, _)| sql.starts_with("INSERT")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_policy_processes_later_checkpoints() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;
        // every attempt at the first checkpoint's only insert fails
        h.transport
            .fail_matching_after("INSERT INTO \"camera_locations\"", 0, 3, "D1_ERROR");

        let err = h
            .processor(20, FailurePolicy::Continue)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            MigrateError::CheckpointsFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("[1, 20]"));
            }
            other => panic!("unexpected error: {}", other),
        }
        let checkpoints = h.checkpoints().await;
        assert_eq!(checkpoints[0].status, CheckpointStatus::Failed);
        assert_eq!(checkpoints[1].status, CheckpointStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_before_next_claim() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .processor(16, FailurePolicy::Abort)
            .run(&cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Cancelled));
        assert!(h
            .checkpoints()
            .await
            .iter()
            .all(|cp| cp.status == CheckpointStatus::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_source_is_reconnected_before_fetch() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=5)).with_failing_pings(1));
        h.plan(20).await;

        h.run(16).await.unwrap();

        assert_eq!(h.source.reconnects(), 1);
        assert_eq!(h.checkpoints().await[0].status, CheckpointStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_fails_the_checkpoint() {
        let h = Harness::new(
            MemorySource::new(camera_rows(1..=5))
                .with_failing_pings(1)
                .with_failing_reconnect(),
        );
        h.plan(20).await;

        let err = h.run(16).await.unwrap_err();

        assert!(matches!(err, MigrateError::Checkpoint { .. }));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(h.checkpoints().await[0].status, CheckpointStatus::Failed);
        assert!(h.source.fetches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_in_progress_is_not_claimed() {
        let h = Harness::new(MemorySource::new(camera_rows(1..=35)));
        h.plan(20).await;
        let first = h.checkpoints().await[0].id;
        h.store.force_status(first, CheckpointStatus::InProgress, 0).await;

        let summary = h.run(16).await.unwrap();

        assert_eq!(summary.checkpoints_completed, 1);
        assert_eq!(h.source.fetches(), vec![(21, 35)]);
        // nothing is eligible afterwards, so verification runs and sees the gap
        let verification = summary.verification.unwrap();
        assert_eq!(verification.source_count, 35);
        assert_eq!(verification.target_count, 15);
    }
}
