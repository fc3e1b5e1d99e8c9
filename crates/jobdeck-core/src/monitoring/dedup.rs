use std::time::Duration;

use moka::sync::Cache;

use crate::config::OrchestratorConfig;
use crate::models::{BatchStatus, ExecutionId, JobExecution};

/// Drops repeat `(execution id, status)` notifications arriving from
/// redundant paths.
///
/// Suppression is best-effort within the configured window: a key evicted by
/// capacity pressure or expiry is forwarded again.
pub struct DuplicateExecutionFilter {
    seen: Cache<(ExecutionId, BatchStatus), ()>,
}

impl DuplicateExecutionFilter {
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(window)
                .build(),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.dedup_capacity, config.dedup_window())
    }

    /// Returns a copy of `execution` the first time its key is observed.
    pub fn filter(&self, execution: &JobExecution) -> Option<JobExecution> {
        let key = (execution.id, execution.status);
        if self.seen.entry(key).or_insert(()).is_fresh() {
            Some(execution.clone())
        } else {
            tracing::trace!(
                execution_id = execution.id.0,
                status = %execution.status,
                "suppressed duplicate execution notification"
            );
            None
        }
    }
}
