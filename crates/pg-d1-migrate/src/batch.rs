//! Batch sizing against the destination's bound-parameter ceiling.

use tracing::info;

use crate::error::{MigrateError, Result};

/// Default bound-parameter ceiling for one destination query.
pub const DEFAULT_PARAMETER_CEILING: usize = 99;

/// Maximum number of rows that fit in one insert call.
///
/// Fails when a single row cannot fit, which is a configuration error.
pub fn max_batch_rows(column_count: usize, parameter_ceiling: usize) -> Result<usize> {
    if column_count == 0 {
        return Err(MigrateError::Config(
            "cannot size batches for a table with no columns".into(),
        ));
    }
    if column_count > parameter_ceiling {
        return Err(MigrateError::Config(format!(
            "a row has {} columns but the destination accepts only {} bound parameters per query",
            column_count, parameter_ceiling
        )));
    }
    Ok(parameter_ceiling / column_count)
}

/// Effective batch size after clamping a caller request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize {
    /// Rows per insert call.
    pub rows: usize,
    /// The caller's request when it was larger than the maximum.
    pub clamped_from: Option<usize>,
}

impl BatchSize {
    /// Resolve the batch size for a table shape, clamping `requested` to the maximum.
    pub fn resolve(
        column_count: usize,
        parameter_ceiling: usize,
        requested: Option<usize>,
    ) -> Result<Self> {
        let max = max_batch_rows(column_count, parameter_ceiling)?;

        let size = match requested {
            Some(0) => {
                return Err(MigrateError::Config(
                    "batch size must be at least 1".into(),
                ))
            }
            Some(req) if req > max => {
                info!(
                    "Requested batch size {} exceeds the {}-parameter limit for {} columns; using {}",
                    req, parameter_ceiling, column_count, max
                );
                BatchSize {
                    rows: max,
                    clamped_from: Some(req),
                }
            }
            Some(req) => BatchSize {
                rows: req,
                clamped_from: None,
            },
            None => BatchSize {
                rows: max,
                clamped_from: None,
            },
        };

        Ok(size)
    }
}
