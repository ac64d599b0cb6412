//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_PARAMETER_CEILING;
use crate::destination::RetryPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    #[serde(default)]
    pub source: SourceConfig,

    /// Destination configuration (Cloudflare D1).
    #[serde(default)]
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection string, URL (`postgres://...`) or key/value form.
    #[serde(default)]
    pub url: String,

    /// SSL mode: disable, require or verify-full (default: disable).
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Connect timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ssl_mode: default_disable(),
            connect_timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &redact_connection_string(&self.url))
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Destination (Cloudflare D1 HTTP API) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Cloudflare account identifier.
    #[serde(default)]
    pub account_id: String,

    /// D1 database identifier.
    #[serde(default)]
    pub database_id: String,

    /// API token with D1 edit permission.
    #[serde(default)]
    pub api_token: String,

    /// API base URL (default: https://api.cloudflare.com/client/v4).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Maximum bound parameters per query (default: 99).
    #[serde(default = "default_max_bound_params")]
    pub max_bound_params: usize,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            database_id: String::new(),
            api_token: String::new(),
            api_base_url: default_api_base_url(),
            max_bound_params: default_max_bound_params(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("account_id", &self.account_id)
            .field("database_id", &self.database_id)
            .field("api_token", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("max_bound_params", &self.max_bound_params)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Table to migrate; must name a known table profile.
    #[serde(default)]
    pub table: String,

    /// Width of each checkpoint ID range (default: 50000).
    #[serde(default = "default_checkpoint_size")]
    pub checkpoint_size: i64,

    /// Rows per insert call. Clamped to the parameter ceiling; the maximum is used if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Reuse existing checkpoints (true) or discard and replan (false). Default: true.
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Pause between sub-batch inserts in milliseconds (default: 200).
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,

    /// Probe the source connection every N sub-batches (default: 100).
    #[serde(default = "default_probe_interval")]
    pub source_probe_interval: usize,

    /// What to do when a checkpoint fails (default: abort).
    #[serde(default)]
    pub on_checkpoint_failure: FailurePolicy,

    /// Destination retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            checkpoint_size: default_checkpoint_size(),
            batch_size: None,
            resume: true,
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            source_probe_interval: default_probe_interval(),
            on_checkpoint_failure: FailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Run behavior after a checkpoint fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run at the first failed checkpoint.
    #[default]
    Abort,

    /// Record the failure, continue with later checkpoints, report all failures at the end.
    Continue,
}

/// Hide the password in a PostgreSQL connection string.
pub(crate) fn redact_connection_string(conn: &str) -> String {
    if let Some((scheme, rest)) = conn.split_once("://") {
        if let Some((userinfo, host)) = rest.rsplit_once('@') {
            let user = userinfo.split(':').next().unwrap_or_default();
            if userinfo.contains(':') {
                return format!("{}://{}:[REDACTED]@{}", scheme, user, host);
            }
        }
        return conn.to_string();
    }

    conn.split_whitespace()
        .map(|part| {
            if part.to_lowercase().starts_with("password=") {
                "password=[REDACTED]".to_string()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// Default value functions for serde
fn default_disable() -> String {
    "disable".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_api_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_max_bound_params() -> usize {
    DEFAULT_PARAMETER_CEILING
}

fn default_checkpoint_size() -> i64 {
    50_000
}

fn default_true() -> bool {
    true
}

fn default_inter_batch_delay_ms() -> u64 {
    200
}

fn default_probe_interval() -> usize {
    100
}
