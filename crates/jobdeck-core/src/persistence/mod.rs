pub mod in_memory;

pub use in_memory::InMemoryJobStore;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::job::Job;
use crate::models::{
    CoreError, ExecutionContext, ExecutionId, InstanceId, JobExecution, JobInstance,
    JobParameters, StepExecution, StepExecutionId,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait JobLocator: Send + Sync {
    fn get_job(&self, name: &str) -> PersistenceResult<Arc<Job>>;

    fn job_names(&self) -> BTreeSet<String>;
}

pub trait JobLauncher: Send + Sync {
    fn run(&self, job: &Job, parameters: JobParameters) -> PersistenceResult<JobExecution>;
}

/// Write side of the job repository.
pub trait JobRepository: Send + Sync {
    fn last_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<Option<JobExecution>>;

    /// Creates a STARTING execution, creating the instance on first use.
    ///
    /// Fails with `AlreadyRunning` when the instance has a running execution
    /// and with `InstanceAlreadyComplete` when its last execution completed
    /// or was abandoned.
    fn create_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<JobExecution>;

    /// Persists status, timestamps and exit status. Bumps `version` on success
    /// and fails with `StaleVersion` when the stored version has moved on.
    fn update(&self, execution: &mut JobExecution) -> PersistenceResult<()>;

    fn add_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()>;

    fn update_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()>;

    fn update_execution_context(
        &self,
        execution: ExecutionId,
        context: &ExecutionContext,
    ) -> PersistenceResult<()>;
}

/// Read side of the job repository. Executions are returned with their step
/// executions but without execution contexts, which load separately.
pub trait ExecutionQuery: Send + Sync {
    fn execution(&self, id: ExecutionId) -> PersistenceResult<Option<JobExecution>>;

    fn instance(&self, id: InstanceId) -> PersistenceResult<Option<JobInstance>>;

    /// Newest first.
    fn executions_for_instance(&self, id: InstanceId) -> PersistenceResult<Vec<JobExecution>>;

    fn running_executions(&self) -> PersistenceResult<Vec<JobExecution>>;

    fn step_executions(&self, execution: ExecutionId) -> PersistenceResult<Vec<StepExecution>>;

    fn step_execution(
        &self,
        execution: ExecutionId,
        step: StepExecutionId,
    ) -> PersistenceResult<Option<StepExecution>>;

    /// Most recent first, capped at `limit`.
    fn step_executions_for_step(
        &self,
        job_name: &str,
        step_name: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<StepExecution>>;

    fn execution_context(&self, execution: ExecutionId) -> PersistenceResult<ExecutionContext>;

    fn step_execution_context(&self, step: StepExecutionId)
    -> PersistenceResult<ExecutionContext>;
}
