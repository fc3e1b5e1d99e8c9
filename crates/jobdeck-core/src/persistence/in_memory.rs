use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use crate::models::{
    BatchStatus, CoreError, CoreErrorKind, ExecutionContext, ExecutionId, InstanceId, JobExecution,
    JobInstance, JobParameters, StepExecution, StepExecutionId,
};
use crate::persistence::{ExecutionQuery, JobRepository, PersistenceResult};

/// Process-local job repository. Useful for embedding and tests; state is lost
/// on drop.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    next_instance_id: u64,
    next_execution_id: u64,
    next_step_id: u64,
    instances: BTreeMap<InstanceId, JobInstance>,
    instance_index: HashMap<(String, String), InstanceId>,
    executions: BTreeMap<ExecutionId, JobExecution>,
    steps: BTreeMap<StepExecutionId, StepExecution>,
    contexts: HashMap<ExecutionId, ExecutionContext>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> PersistenceResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "job store mutex poisoned")
        })
    }
}

impl StoreState {
    fn instance_for(&self, job_name: &str, parameters: &JobParameters) -> Option<InstanceId> {
        self.instance_index
            .get(&(job_name.to_string(), parameters.identity_key()))
            .copied()
    }

    fn executions_of(&self, instance: InstanceId) -> Vec<&JobExecution> {
        self.executions
            .values()
            .rev()
            .filter(|execution| execution.instance.id == instance)
            .collect()
    }

    fn assemble(&self, execution: &JobExecution) -> JobExecution {
        let mut assembled = execution.clone();
        assembled.step_executions = self.steps_of(execution.id);
        assembled
    }

    fn steps_of(&self, execution: ExecutionId) -> Vec<StepExecution> {
        self.steps
            .values()
            .filter(|step| step.job_execution_id == execution)
            .map(without_context)
            .collect()
    }
}

impl JobRepository for InMemoryJobStore {
    fn last_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<Option<JobExecution>> {
        let state = self.lock_state()?;
        let Some(instance) = state.instance_for(job_name, parameters) else {
            return Ok(None);
        };
        Ok(state
            .executions_of(instance)
            .first()
            .map(|execution| state.assemble(execution)))
    }

    fn create_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<JobExecution> {
        let mut state = self.lock_state()?;

        let instance_id = match state.instance_for(job_name, parameters) {
            Some(instance_id) => {
                let prior = state.executions_of(instance_id);
                if let Some(running) = prior.iter().find(|execution| execution.is_running()) {
                    return Err(already_running(job_name, running.id));
                }
                if let Some(done) = prior.iter().find(|execution| {
                    matches!(
                        execution.status,
                        BatchStatus::Completed | BatchStatus::Abandoned
                    )
                }) {
                    return Err(instance_complete(job_name, done.id));
                }
                instance_id
            }
            None => {
                state.next_instance_id = state.next_instance_id.saturating_add(1);
                let instance = JobInstance {
                    id: InstanceId(state.next_instance_id),
                    job_name: job_name.to_string(),
                    identity_key: parameters.identity_key(),
                };
                state.instance_index.insert(
                    (job_name.to_string(), instance.identity_key.clone()),
                    instance.id,
                );
                state.instances.insert(instance.id, instance.clone());
                instance.id
            }
        };

        let instance = state
            .instances
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| CoreError::new(CoreErrorKind::Internal, "job instance index is stale"))?;

        state.next_execution_id = state.next_execution_id.saturating_add(1);
        let execution = JobExecution::new(
            ExecutionId(state.next_execution_id),
            instance,
            parameters.clone(),
            SystemTime::now(),
        );
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    fn update(&self, execution: &mut JobExecution) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        let stored = state
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| CoreError::no_such_execution(execution.id))?;

        if stored.version != execution.version {
            return Err(CoreError::new(
                CoreErrorKind::StaleVersion,
                format!(
                    "job execution '{}' was updated concurrently (stored version {}, given {})",
                    execution.id.0, stored.version, execution.version
                ),
            )
            .with_execution(execution.id));
        }

        execution.version += 1;
        *stored = JobExecution {
            step_executions: Vec::new(),
            execution_context: ExecutionContext::new(),
            ..execution.clone()
        };
        Ok(())
    }

    fn add_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        if !state.executions.contains_key(&step.job_execution_id) {
            return Err(CoreError::no_such_execution(step.job_execution_id));
        }
        state.next_step_id = state.next_step_id.saturating_add(1);
        step.id = StepExecutionId(state.next_step_id);
        step.version = 0;
        state.steps.insert(step.id, step.clone());
        Ok(())
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        let stored = state
            .steps
            .get_mut(&step.id)
            .ok_or_else(|| no_such_step(step.id))?;
        if stored.version != step.version {
            return Err(CoreError::new(
                CoreErrorKind::StaleVersion,
                format!("step execution '{}' was updated concurrently", step.id.0),
            )
            .with_execution(step.job_execution_id));
        }
        step.version += 1;
        *stored = step.clone();
        Ok(())
    }

    fn update_execution_context(
        &self,
        execution: ExecutionId,
        context: &ExecutionContext,
    ) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        if !state.executions.contains_key(&execution) {
            return Err(CoreError::no_such_execution(execution));
        }
        state.contexts.insert(execution, context.clone());
        Ok(())
    }
}

impl ExecutionQuery for InMemoryJobStore {
    fn execution(&self, id: ExecutionId) -> PersistenceResult<Option<JobExecution>> {
        let state = self.lock_state()?;
        Ok(state
            .executions
            .get(&id)
            .map(|execution| state.assemble(execution)))
    }

    fn instance(&self, id: InstanceId) -> PersistenceResult<Option<JobInstance>> {
        Ok(self.lock_state()?.instances.get(&id).cloned())
    }

    fn executions_for_instance(&self, id: InstanceId) -> PersistenceResult<Vec<JobExecution>> {
        let state = self.lock_state()?;
        Ok(state
            .executions_of(id)
            .into_iter()
            .map(|execution| state.assemble(execution))
            .collect())
    }

    fn running_executions(&self) -> PersistenceResult<Vec<JobExecution>> {
        let state = self.lock_state()?;
        Ok(state
            .executions
            .values()
            .filter(|execution| execution.is_running())
            .map(|execution| state.assemble(execution))
            .collect())
    }

    fn step_executions(&self, execution: ExecutionId) -> PersistenceResult<Vec<StepExecution>> {
        Ok(self.lock_state()?.steps_of(execution))
    }

    fn step_execution(
        &self,
        execution: ExecutionId,
        step: StepExecutionId,
    ) -> PersistenceResult<Option<StepExecution>> {
        let state = self.lock_state()?;
        Ok(state
            .steps
            .get(&step)
            .filter(|stored| stored.job_execution_id == execution)
            .map(without_context))
    }

    fn step_executions_for_step(
        &self,
        job_name: &str,
        step_name: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<StepExecution>> {
        let state = self.lock_state()?;
        Ok(state
            .steps
            .values()
            .rev()
            .filter(|step| step.step_name == step_name)
            .filter(|step| {
                state
                    .executions
                    .get(&step.job_execution_id)
                    .is_some_and(|execution| execution.job_name() == job_name)
            })
            .take(limit)
            .map(without_context)
            .collect())
    }

    fn execution_context(&self, execution: ExecutionId) -> PersistenceResult<ExecutionContext> {
        let state = self.lock_state()?;
        if !state.executions.contains_key(&execution) {
            return Err(CoreError::no_such_execution(execution));
        }
        Ok(state.contexts.get(&execution).cloned().unwrap_or_default())
    }

    fn step_execution_context(
        &self,
        step: StepExecutionId,
    ) -> PersistenceResult<ExecutionContext> {
        let state = self.lock_state()?;
        state
            .steps
            .get(&step)
            .map(|stored| stored.execution_context.clone())
            .ok_or_else(|| no_such_step(step))
    }
}

fn without_context(step: &StepExecution) -> StepExecution {
    StepExecution {
        execution_context: ExecutionContext::new(),
        ..step.clone()
    }
}

fn already_running(job_name: &str, execution: ExecutionId) -> CoreError {
    CoreError::new(
        CoreErrorKind::AlreadyRunning,
        format!(
            "a job execution for this instance is already running: '{}'",
            execution.0
        ),
    )
    .with_job(job_name)
    .with_execution(execution)
}

fn instance_complete(job_name: &str, execution: ExecutionId) -> CoreError {
    CoreError::new(
        CoreErrorKind::InstanceAlreadyComplete,
        "a job instance already exists and is complete for these parameters",
    )
    .with_job(job_name)
    .with_execution(execution)
}

fn no_such_step(step: StepExecutionId) -> CoreError {
    CoreError::new(
        CoreErrorKind::NoSuchStepExecution,
        format!("no step execution with id '{}'", step.0),
    )
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::models::ExitStatus;

    fn parameters() -> JobParameters {
        JobParameters::new().with_string("input", "orders.csv")
    }

    #[test]
    fn executions_for_identical_identity_share_an_instance() {
        let store = InMemoryJobStore::new();
        let mut first = store.create_execution("import", &parameters()).unwrap();
        first.finish(BatchStatus::Failed, ExitStatus::failed(), UNIX_EPOCH);
        store.update(&mut first).unwrap();

        let second = store.create_execution("import", &parameters()).unwrap();

        assert_eq!(first.instance.id, second.instance.id);
        assert_ne!(first.id, second.id);
        let last = store
            .last_execution("import", &parameters())
            .unwrap()
            .unwrap();
        assert_eq!(last.id, second.id);
    }

    #[test]
    fn running_instance_rejects_a_second_execution() {
        let store = InMemoryJobStore::new();
        store.create_execution("import", &parameters()).unwrap();

        let error = store
            .create_execution("import", &parameters())
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::AlreadyRunning);
    }

    #[test]
    fn completed_instance_rejects_a_second_execution() {
        let store = InMemoryJobStore::new();
        let mut first = store.create_execution("import", &parameters()).unwrap();
        first.finish(BatchStatus::Completed, ExitStatus::completed(), UNIX_EPOCH);
        store.update(&mut first).unwrap();

        let error = store
            .create_execution("import", &parameters())
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InstanceAlreadyComplete);
    }

    #[test]
    fn stale_update_is_rejected() {
        let store = InMemoryJobStore::new();
        let mut current = store.create_execution("import", &parameters()).unwrap();
        let mut stale = current.clone();

        current.mark_started(UNIX_EPOCH);
        store.update(&mut current).unwrap();
        assert_eq!(current.version, 1);

        stale.request_stop(UNIX_EPOCH);
        let error = store.update(&mut stale).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::StaleVersion);
    }

    #[test]
    fn step_executions_are_listed_per_step_name_newest_first() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for input in ["a", "b", "c"] {
            let execution = store
                .create_execution("import", &JobParameters::new().with_string("input", input))
                .unwrap();
            let mut step = StepExecution::new(execution.id, "load", UNIX_EPOCH);
            step.execution_context.put("cursor", 10);
            store.add_step_execution(&mut step).unwrap();
            ids.push(step.id);
        }

        let listed = store.step_executions_for_step("import", "load", 2).unwrap();
        assert_eq!(
            listed.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );
        assert!(listed.iter().all(|s| s.execution_context.is_empty()));
        assert_eq!(
            store
                .step_execution_context(ids[0])
                .unwrap()
                .get("cursor")
                .cloned(),
            Some(serde_json::json!(10))
        );
    }
}
