use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::models::{BatchStatus, ExitStatus, JobParameters};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ExecutionId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StepExecutionId(pub u64);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: InstanceId,
    pub job_name: String,
    pub identity_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub job_execution_id: ExecutionId,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub last_updated: Option<SystemTime>,
    pub terminate_only: bool,
    pub version: u64,
    #[serde(default)]
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    /// Unsaved step; the repository assigns `id` on insert.
    pub fn new(
        job_execution_id: ExecutionId,
        step_name: impl Into<String>,
        start_time: SystemTime,
    ) -> Self {
        Self {
            id: StepExecutionId(0),
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Started,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            start_time,
            end_time: None,
            last_updated: Some(start_time),
            terminate_only: false,
            version: 0,
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Elapsed time up to `end_time`, or up to `now` while still running.
    pub fn elapsed(&self, now: SystemTime) -> Duration {
        self.end_time
            .unwrap_or(now)
            .duration_since(self.start_time)
            .unwrap_or(Duration::ZERO)
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus, end_time: SystemTime) {
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(end_time);
        self.last_updated = Some(end_time);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: ExecutionId,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub last_updated: Option<SystemTime>,
    pub version: u64,
    pub step_executions: Vec<StepExecution>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
}

impl JobExecution {
    pub fn new(
        id: ExecutionId,
        instance: JobInstance,
        parameters: JobParameters,
        create_time: SystemTime,
    ) -> Self {
        Self {
            id,
            instance,
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time,
            start_time: None,
            end_time: None,
            last_updated: Some(create_time),
            version: 0,
            step_executions: Vec::new(),
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn mark_started(&mut self, now: SystemTime) {
        self.status = BatchStatus::Started;
        self.exit_status = ExitStatus::executing();
        self.start_time = Some(now);
        self.last_updated = Some(now);
    }

    /// Records a stop request. Steps still have to observe `terminate_only`.
    pub fn request_stop(&mut self, now: SystemTime) {
        for step in &mut self.step_executions {
            step.terminate_only = true;
        }
        self.status = BatchStatus::Stopping;
        self.last_updated = Some(now);
    }

    pub fn mark_abandoned(&mut self, now: SystemTime) {
        self.status = BatchStatus::Abandoned;
        self.end_time.get_or_insert(now);
        self.last_updated = Some(now);
    }

    pub fn finish(&mut self, status: BatchStatus, exit_status: ExitStatus, end_time: SystemTime) {
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(end_time);
        self.last_updated = Some(end_time);
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    fn execution() -> JobExecution {
        JobExecution::new(
            ExecutionId(1),
            JobInstance {
                id: InstanceId(1),
                job_name: "import".to_string(),
                identity_key: String::new(),
            },
            JobParameters::new(),
            UNIX_EPOCH,
        )
    }

    #[test]
    fn stop_request_flags_every_step() {
        let mut execution = execution();
        execution.mark_started(UNIX_EPOCH + Duration::from_secs(1));
        execution.step_executions.push(StepExecution::new(
            execution.id,
            "load",
            UNIX_EPOCH + Duration::from_secs(1),
        ));

        execution.request_stop(UNIX_EPOCH + Duration::from_secs(2));

        assert_eq!(execution.status, BatchStatus::Stopping);
        assert!(execution.is_running());
        assert!(execution.step_executions.iter().all(|s| s.terminate_only));
    }

    #[test]
    fn abandon_keeps_an_existing_end_time() {
        let mut execution = execution();
        let ended = UNIX_EPOCH + Duration::from_secs(5);
        execution.finish(BatchStatus::Failed, ExitStatus::failed(), ended);

        execution.mark_abandoned(UNIX_EPOCH + Duration::from_secs(9));

        assert_eq!(execution.status, BatchStatus::Abandoned);
        assert_eq!(execution.end_time, Some(ended));
    }

    #[test]
    fn step_elapsed_uses_now_until_finished() {
        let mut step = StepExecution::new(ExecutionId(1), "load", UNIX_EPOCH);
        assert_eq!(
            step.elapsed(UNIX_EPOCH + Duration::from_millis(40)),
            Duration::from_millis(40)
        );

        step.finish(
            BatchStatus::Completed,
            ExitStatus::completed(),
            UNIX_EPOCH + Duration::from_millis(25),
        );
        assert_eq!(
            step.elapsed(UNIX_EPOCH + Duration::from_secs(10)),
            Duration::from_millis(25)
        );
    }
}
