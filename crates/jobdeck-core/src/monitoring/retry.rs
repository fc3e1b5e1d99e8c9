use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::models::{BatchStatus, ExecutionId, JobExecution, JobParameters};
use crate::orchestration::OrchestrationResult;
use crate::persistence::ExecutionQuery;

/// Substring that marks a step failure as transient.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryMarker(String);

impl RetryMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, exit_description: &str) -> bool {
        !self.0.is_empty() && exit_description.contains(&self.0)
    }
}

/// Instruction to launch the same job again with the same parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RestartRequest {
    pub job_name: String,
    pub parameters: JobParameters,
    pub source_execution: ExecutionId,
}

/// Offers at most one automatic retry per failed execution whose steps
/// report a transient failure.
pub struct AutoRetryClassifier {
    query: Arc<dyn ExecutionQuery>,
    marker: RetryMarker,
    offered: Cache<ExecutionId, ()>,
}

impl AutoRetryClassifier {
    pub fn new(
        query: Arc<dyn ExecutionQuery>,
        marker: RetryMarker,
        capacity: u64,
        window: Duration,
    ) -> Self {
        Self {
            query,
            marker,
            offered: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(window)
                .build(),
        }
    }

    pub fn from_config(query: Arc<dyn ExecutionQuery>, config: &OrchestratorConfig) -> Self {
        Self::new(
            query,
            RetryMarker::new(config.retry_marker.clone()),
            config.dedup_capacity,
            config.dedup_window(),
        )
    }

    pub fn marker(&self) -> &RetryMarker {
        &self.marker
    }

    pub fn classify(&self, execution: &JobExecution) -> OrchestrationResult<Option<RestartRequest>> {
        if execution.status < BatchStatus::Stopped {
            return Ok(None);
        }

        // Any later execution on the instance means a retry already happened.
        let attempts = self.query.executions_for_instance(execution.instance.id)?;
        if attempts.len() > 1 {
            return Ok(None);
        }

        if self.offered.contains_key(&execution.id) {
            return Ok(None);
        }

        let loaded;
        let steps = if execution.step_executions.is_empty() {
            loaded = self.query.step_executions(execution.id)?;
            &loaded
        } else {
            &execution.step_executions
        };

        let transient = steps
            .iter()
            .any(|step| self.marker.matches(&step.exit_status.exit_description));
        if !transient {
            return Ok(None);
        }

        if !self.offered.entry(execution.id).or_insert(()).is_fresh() {
            return Ok(None);
        }

        tracing::info!(
            job = %execution.job_name(),
            execution_id = execution.id.0,
            status = %execution.status,
            marker = %self.marker.as_str(),
            "offering automatic retry for transient failure"
        );
        Ok(Some(RestartRequest {
            job_name: execution.job_name().to_string(),
            parameters: execution.parameters.clone(),
            source_execution: execution.id,
        }))
    }
}
