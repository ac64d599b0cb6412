//! Migration orchestrator - wires the components from a [`Config`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::BatchSize;
use crate::config::Config;
use crate::destination::{D1Client, DestinationGateway, QueryTransport};
use crate::error::Result;
use crate::planner::{partition_ranges, CheckpointPlanner, PlanOutcome};
use crate::processor::{CheckpointProcessor, ProcessorSettings, RunSummary};
use crate::profile::TableProfile;
use crate::source::{PgSource, RowSource};
use crate::state::{
    Checkpoint, CheckpointStore, D1CheckpointStore, MemoryCheckpointStore, StatusCounts,
};
use crate::verify::{verify_counts, VerificationReport};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    profile: TableProfile,
    batch: BatchSize,
    source: Arc<dyn RowSource>,
    gateway: DestinationGateway,
    store: Arc<dyn CheckpointStore>,
}

/// Result of `plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    #[serde(flatten)]
    pub outcome: PlanOutcome,
    pub dry_run: bool,
    pub checkpoint_size: i64,
    pub batch_size: usize,
    /// Requested batch size when it exceeded the parameter limit.
    pub batch_clamped_from: Option<usize>,
    /// Ranges that are (or would be) recorded for the table.
    pub ranges: Vec<(i64, i64)>,
}

/// Checkpoint state of one table.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub table: String,
    pub counts: StatusCounts,
    pub last_completed: Option<Checkpoint>,
    /// Ranges the next run would claim, in order.
    pub eligible: Vec<(i64, i64)>,
    pub records_processed: i64,
}

/// Which checkpoints `reset` touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Move `in_progress` checkpoints back to `pending`.
    Stuck,
    /// Delete every checkpoint of the table.
    All,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    pub destination_error: Option<String>,
}

impl Orchestrator {
    /// Connect to the source and build the D1 destination from `config`.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = PgSource::connect(&config.source).await?;
        let transport = D1Client::new(&config.target)?;
        Self::from_parts(config, Arc::new(source), Arc::new(transport))
    }

    /// Build from an already connected source and destination transport.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn RowSource>,
        transport: Arc<dyn QueryTransport>,
    ) -> Result<Self> {
        let profile = config.profile()?;
        let batch = config.batch_size()?;
        let gateway = DestinationGateway::new(
            transport,
            config.migration.retry.clone(),
            config.target.max_bound_params,
        );
        let store: Arc<dyn CheckpointStore> = Arc::new(D1CheckpointStore::new(gateway.clone()));

        info!(
            "Migrating {} from {} to {} in checkpoints of {} ids, {} rows per insert ({} checkpoint store)",
            profile,
            source.db_type(),
            gateway.transport_name(),
            config.migration.checkpoint_size,
            batch.rows,
            store.backend_type()
        );

        Ok(Self {
            config,
            profile,
            batch,
            source,
            gateway,
            store,
        })
    }

    pub fn profile(&self) -> TableProfile {
        self.profile
    }

    /// Plan (or resume) and then process every eligible checkpoint.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let outcome = self
            .planner(self.store.clone())
            .plan(self.config.migration.resume)
            .await?;
        info!("Planning for {}: {:?}", outcome.table, outcome.action);

        let settings = ProcessorSettings {
            batch_rows: self.batch.rows,
            inter_batch_delay: std::time::Duration::from_millis(
                self.config.migration.inter_batch_delay_ms,
            ),
            probe_interval: self.config.migration.source_probe_interval,
            failure_policy: self.config.migration.on_checkpoint_failure,
        };
        CheckpointProcessor::new(
            self.source.clone(),
            self.gateway.clone(),
            self.store.clone(),
            self.profile,
            settings,
        )
        .run(cancel)
        .await
    }

    /// Plan checkpoints without processing them.
    ///
    /// A dry run partitions against an in-memory store and never touches the
    /// destination.
    pub async fn plan(&self, dry_run: bool) -> Result<PlanReport> {
        let store: Arc<dyn CheckpointStore> = if dry_run {
            Arc::new(MemoryCheckpointStore::new())
        } else {
            self.store.clone()
        };

        let outcome = self
            .planner(store.clone())
            .plan(self.config.migration.resume)
            .await?;

        let ranges = if dry_run {
            match (outcome.stats.min_id, outcome.stats.max_id) {
                (Some(min), Some(max)) if outcome.stats.count > 0 => {
                    partition_ranges(min, max, self.config.migration.checkpoint_size)
                }
                _ => Vec::new(),
            }
        } else {
            store
                .list_all(self.profile.table_name())
                .await?
                .iter()
                .map(|cp| (cp.start_id, cp.end_id))
                .collect()
        };

        Ok(PlanReport {
            outcome,
            dry_run,
            checkpoint_size: self.config.migration.checkpoint_size,
            batch_size: self.batch.rows,
            batch_clamped_from: self.batch.clamped_from,
            ranges,
        })
    }

    /// Current checkpoint state of the configured table.
    pub async fn status(&self) -> Result<StatusReport> {
        let table = self.profile.table_name();
        self.store.ensure_schema().await?;

        let all = self.store.list_all(table).await?;
        let counts = self.store.status_counts(table).await?;
        let last_completed = self.store.last_completed(table).await?;

        Ok(StatusReport {
            table: table.to_string(),
            counts,
            last_completed,
            eligible: all
                .iter()
                .filter(|cp| cp.status.is_eligible())
                .map(|cp| (cp.start_id, cp.end_id))
                .collect(),
            records_processed: all.iter().map(|cp| cp.records_processed).sum(),
        })
    }

    /// Manual recovery. Returns the number of checkpoints affected.
    pub async fn reset(&self, scope: ResetScope) -> Result<u64> {
        let table = self.profile.table_name();
        self.store.ensure_schema().await?;
        let affected = match scope {
            ResetScope::Stuck => self.store.reset_in_progress(table).await?,
            ResetScope::All => self.store.clear_checkpoints(table).await?,
        };
        warn!("Reset ({:?}) of {}: {} checkpoints affected", scope, table, affected);
        Ok(affected)
    }

    /// Compare source and destination row counts.
    pub async fn validate(&self) -> Result<VerificationReport> {
        verify_counts(self.source.as_ref(), &self.gateway, self.profile).await
    }

    /// Probe source and destination with `SELECT 1`.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let destination = self.gateway.ping().await;
        let destination_latency_ms = start.elapsed().as_millis() as u64;

        let result = HealthCheckResult {
            healthy: source.is_ok() && destination.is_ok(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            destination_connected: destination.is_ok(),
            destination_latency_ms,
            destination_error: destination.err().map(|e| e.to_string()),
        };
        if !result.healthy {
            warn!("Health check failed: {:?}", result);
        }
        Ok(result)
    }

    fn planner(&self, store: Arc<dyn CheckpointStore>) -> CheckpointPlanner {
        CheckpointPlanner::new(
            self.source.clone(),
            store,
            self.profile,
            self.config.migration.checkpoint_size,
        )
    }
}

impl PlanReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
