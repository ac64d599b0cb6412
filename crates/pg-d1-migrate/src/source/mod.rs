//! Row source.
//!
//! The engine reads the source only through [`RowSource`]: table statistics
//! for planning and inclusive ID-range fetches for processing.

mod postgres;
mod tls;

pub use postgres::PgSource;
pub use tls::SslMode;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::SourceRow;
use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;

/// Row count and ID bounds of a source table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub count: i64,
    /// `None` when the table is empty.
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
}

/// Read-only access to the source table.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Row count and ID bounds of the profile's table.
    async fn table_stats(&self, profile: TableProfile) -> Result<TableStats>;

    /// Rows with `min_id <= id <= max_id`, ordered by `id` ascending,
    /// with values in the profile's column order.
    async fn query_range(
        &self,
        profile: TableProfile,
        min_id: i64,
        max_id: i64,
    ) -> Result<Vec<SourceRow>>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;

    /// Drop the current connection and open a new one.
    async fn reconnect(&self) -> Result<()>;

    /// Probe the connection and reconnect if the probe fails.
    ///
    /// Only a failed reconnect is an error.
    async fn ensure_connected(&self) -> Result<()> {
        if let Err(e) = self.ping().await {
            info!("Source liveness probe failed ({}), reconnecting", e);
            self.reconnect()
                .await
                .map_err(|e| MigrateError::connection(e, "reconnecting to source"))?;
            debug!("Source reconnected");
        }
        Ok(())
    }

    /// Source type for logging.
    fn db_type(&self) -> &'static str;
}
