//! # pg-d1-migrate
//!
//! Resumable, checkpointed migration of a PostgreSQL table into Cloudflare D1.
//!
//! The source table's ID space is split into contiguous checkpoint ranges
//! that are recorded in the destination itself. Each range is fetched,
//! normalized and inserted in batches small enough for D1's bound-parameter
//! limit. A rerun picks up every `pending` or `failed` range and skips the
//! completed ones.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_d1_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let summary = orchestrator.run(&CancellationToken::new()).await?;
//!     println!("Migrated {} rows", summary.rows_processed);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod core;
pub mod destination;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod processor;
pub mod profile;
pub mod source;
pub mod state;
pub mod transform;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use batch::BatchSize;
pub use config::{Config, FailurePolicy, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheckResult, Orchestrator, PlanReport, ResetScope, StatusReport};
pub use processor::RunSummary;
pub use profile::TableProfile;
pub use state::{Checkpoint, CheckpointStatus};
pub use verify::VerificationReport;
