//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::batch::BatchSize;
use crate::error::{MigrateError, Result};
use crate::profile::TableProfile;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validating it.
    pub fn parse_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build the startup configuration: the optional YAML file, then the
    /// environment overrides, then validation.
    pub fn from_sources<I, K, V>(path: Option<&Path>, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let config = Self::assemble(path, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::from_sources`] but leaves validation to the caller, so
    /// command-line overrides can be applied first.
    pub fn assemble<I, K, V>(path: Option<&Path>, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = match path {
            Some(path) => Self::parse_yaml(&std::fs::read_to_string(path)?)?,
            None => Config::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Apply environment overrides. Unrecognised keys are ignored.
    pub fn apply_env<I, K, V>(&mut self, env: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in env {
            let value = value.as_ref();
            match key.as_ref() {
                "SOURCE_DATABASE_URL" => self.source.url = value.to_string(),
                "SOURCE_SSL_MODE" => self.source.ssl_mode = value.to_string(),
                "D1_ACCOUNT_ID" => self.target.account_id = value.to_string(),
                "D1_DATABASE_ID" => self.target.database_id = value.to_string(),
                "D1_API_TOKEN" => self.target.api_token = value.to_string(),
                "D1_API_BASE_URL" => self.target.api_base_url = value.to_string(),
                "TABLE_NAME" => self.migration.table = value.to_string(),
                "CHECKPOINT_SIZE" => {
                    self.migration.checkpoint_size = parse_env("CHECKPOINT_SIZE", value)?
                }
                "BATCH_SIZE" => {
                    self.migration.batch_size = Some(parse_env("BATCH_SIZE", value)?)
                }
                "RESUME_MODE" => self.migration.resume = parse_bool("RESUME_MODE", value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Table profile selected by `migration.table`.
    pub fn profile(&self) -> Result<TableProfile> {
        TableProfile::from_name(&self.migration.table)
    }

    /// Effective rows per insert call for the configured table.
    pub fn batch_size(&self) -> Result<BatchSize> {
        BatchSize::resolve(
            self.profile()?.column_count(),
            self.target.max_bound_params,
            self.migration.batch_size,
        )
    }
}

impl TargetConfig {
    /// Query endpoint of the configured D1 database.
    pub fn query_url(&self) -> String {
        format!(
            "{}/accounts/{}/d1/database/{}/query",
            self.api_base_url.trim_end_matches('/'),
            self.account_id,
            self.database_id
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MigrateError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(MigrateError::Config(format!(
            "{} must be true or false, got '{}'",
            key, value
        ))),
    }
}
