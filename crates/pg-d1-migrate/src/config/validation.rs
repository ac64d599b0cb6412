//! Configuration validation.
//!
//! Everything checked here is fatal at startup, before any checkpoint state exists.

use super::Config;
use crate::batch::BatchSize;
use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;
use crate::source::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.url.trim().is_empty() {
        return Err(MigrateError::Config(
            "source.url is required (or set SOURCE_DATABASE_URL)".into(),
        ));
    }
    SslMode::parse(&config.source.ssl_mode)?;

    // Target validation
    if config.target.account_id.trim().is_empty() {
        return Err(MigrateError::Config(
            "target.account_id is required (or set D1_ACCOUNT_ID)".into(),
        ));
    }
    if config.target.database_id.trim().is_empty() {
        return Err(MigrateError::Config(
            "target.database_id is required (or set D1_DATABASE_ID)".into(),
        ));
    }
    if config.target.api_token.trim().is_empty() {
        return Err(MigrateError::Config(
            "target.api_token is required (or set D1_API_TOKEN)".into(),
        ));
    }
    if config.target.max_bound_params == 0 {
        return Err(MigrateError::Config(
            "target.max_bound_params must be at least 1".into(),
        ));
    }

    // Migration config validation
    if config.migration.table.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.table is required (or set TABLE_NAME)".into(),
        ));
    }
    let profile = TableProfile::from_name(&config.migration.table)?;

    if config.migration.checkpoint_size < 1 {
        return Err(MigrateError::Config(
            "migration.checkpoint_size must be at least 1".into(),
        ));
    }
    if config.migration.source_probe_interval == 0 {
        return Err(MigrateError::Config(
            "migration.source_probe_interval must be at least 1".into(),
        ));
    }
    if config.migration.retry.max_attempts == 0 {
        return Err(MigrateError::Config(
            "migration.retry.max_attempts must be at least 1".into(),
        ));
    }
    if config.migration.retry.multiplier == 0 {
        return Err(MigrateError::Config(
            "migration.retry.multiplier must be at least 1".into(),
        ));
    }

    // A row must fit in one insert call
    BatchSize::resolve(
        profile.column_count(),
        config.target.max_bound_params,
        config.migration.batch_size,
    )?;

    Ok(())
}
