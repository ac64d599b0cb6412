//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing credentials, impossible sizing, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Source connection could not be (re)established
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// The destination reported a failure, either at the transport level
    /// (non-2xx, malformed body) or at the application level (`success: false`).
    #[error("Remote error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Remote { status: Option<u16>, message: String },

    /// HTTP transport error talking to the destination API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A source value could not be normalized for the destination
    #[error("Transform failed for column {column}: {message}")]
    Transform { column: String, message: String },

    /// Processing of one checkpoint range failed
    #[error("Checkpoint [{start_id}, {end_id}] of {table} failed: {message}")]
    Checkpoint {
        table: String,
        start_id: i64,
        end_id: i64,
        message: String,
    },

    /// One or more checkpoints failed while running with `on_checkpoint_failure: continue`
    #[error("{} checkpoint(s) of {table} failed:\n  {}", .failures.len(), .failures.join("\n  "))]
    CheckpointsFailed { table: String, failures: Vec<String> },

    /// Illegal checkpoint status transition
    #[error("Invalid checkpoint transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Destination row count differs from source row count after all checkpoints completed
    #[error("Verification mismatch for {table}: source={source_count} destination={target_count}")]
    VerificationMismatch {
        table: String,
        source_count: i64,
        target_count: i64,
    },

    /// Checkpoint state could not be read or decoded
    #[error("Checkpoint state error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Remote error
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        MigrateError::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a Checkpoint error naming the affected ID range
    pub fn checkpoint(
        table: impl Into<String>,
        start_id: i64,
        end_id: i64,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::Checkpoint {
            table: table.into(),
            start_id,
            end_id,
            message: message.into(),
        }
    }

    /// Whether the destination rejected a statement because the relation does not exist.
    pub fn is_missing_relation(&self) -> bool {
        match self {
            MigrateError::Remote { message, .. } => {
                let msg = message.to_lowercase();
                msg.contains("no such table") || msg.contains("does not exist")
            }
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Source(_) | MigrateError::Connection { .. } => 2,
            MigrateError::Remote { .. } | MigrateError::Http(_) => 3,
            MigrateError::Transform { .. }
            | MigrateError::Checkpoint { .. }
            | MigrateError::CheckpointsFailed { .. } => 4,
            MigrateError::VerificationMismatch { .. } => 5,
            MigrateError::State(_)
            | MigrateError::InvalidTransition { .. }
            | MigrateError::Json(_) => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
