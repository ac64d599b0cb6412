//! Row-count verification between source and destination.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::destination::DestinationGateway;
use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;
use crate::source::RowSource;

/// Outcome of comparing source and destination row counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub matches: bool,
}

impl VerificationReport {
    pub fn new(table: impl Into<String>, source_count: i64, target_count: i64) -> Self {
        Self {
            table: table.into(),
            source_count,
            target_count,
            matches: source_count == target_count,
        }
    }

    /// The mismatch as an error, if there is one.
    pub fn mismatch_error(&self) -> Option<MigrateError> {
        (!self.matches).then(|| MigrateError::VerificationMismatch {
            table: self.table.clone(),
            source_count: self.source_count,
            target_count: self.target_count,
        })
    }
}

/// Compare total row counts. A missing destination table counts as zero rows.
///
/// A mismatch is reported, not returned as an error.
pub async fn verify_counts(
    source: &dyn RowSource,
    gateway: &DestinationGateway,
    profile: TableProfile,
) -> Result<VerificationReport> {
    let table = profile.table_name();
    let source_count = source.table_stats(profile).await?.count;
    let target_count = if gateway.table_exists(table).await? {
        gateway.count_rows(table).await?
    } else {
        0
    };

    let report = VerificationReport::new(table, source_count, target_count);
    if report.matches {
        info!("Verification {}: {} rows (match)", table, source_count);
    } else {
        warn!(
            "Verification {}: source={} destination={} (MISMATCH)",
            table, source_count, target_count
        );
    }
    Ok(report)
}
