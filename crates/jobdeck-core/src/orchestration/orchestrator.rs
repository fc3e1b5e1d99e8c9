use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::OrchestratorConfig;
use crate::models::{
    BatchStatus, CoreError, CoreErrorKind, ExecutionContext, ExecutionId, InstanceId,
    JobExecution, JobParameters, StepExecution, StepExecutionId,
};
use crate::monitoring::RestartRequest;
use crate::orchestration::{ActiveExecutionSet, OrchestrationResult};
use crate::persistence::{ExecutionQuery, JobLauncher, JobLocator, JobRepository};
use crate::statistics::{StepExecutionHistory, StepExecutionProgress};

/// Number of prior step executions folded into a progress estimate.
pub const PROGRESS_HISTORY_WINDOW: usize = 100;

/// Launches, restarts, stops and abandons job executions and keeps track of
/// the ones this process started.
///
/// Safe to share across request threads. Launch conflicts are left to the
/// repository, which rejects a second running execution per instance.
pub struct JobOrchestrator {
    locator: Arc<dyn JobLocator>,
    launcher: Arc<dyn JobLauncher>,
    repository: Arc<dyn JobRepository>,
    query: Arc<dyn ExecutionQuery>,
    active: ActiveExecutionSet,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(
        locator: Arc<dyn JobLocator>,
        launcher: Arc<dyn JobLauncher>,
        repository: Arc<dyn JobRepository>,
        query: Arc<dyn ExecutionQuery>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            locator,
            launcher,
            repository,
            query,
            active: ActiveExecutionSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn launch(
        &self,
        job_name: &str,
        parameters: JobParameters,
    ) -> OrchestrationResult<JobExecution> {
        let job = self.locator.get_job(job_name)?;

        let restart = self
            .repository
            .last_execution(job_name, &parameters)?
            .is_some_and(|last| {
                last.status.is_unsuccessful() && last.status != BatchStatus::Abandoned
            });

        let parameters = match job.incrementer() {
            Some(incrementer) if !restart => incrementer.next(&parameters),
            _ => parameters,
        };

        let execution = self
            .launcher
            .run(&job, parameters)
            .map_err(|error| attribute_job(error, job_name))?;

        tracing::info!(
            job = %job_name,
            execution_id = execution.id.0,
            restart,
            status = %execution.status,
            "launched job execution"
        );

        self.track(&execution)?;
        Ok(execution)
    }

    pub fn restart(
        &self,
        execution_id: ExecutionId,
        parameters: Option<JobParameters>,
    ) -> OrchestrationResult<JobExecution> {
        let target = self.require_execution(execution_id)?;
        let instance = self
            .query
            .instance(target.instance.id)?
            .ok_or_else(|| no_such_instance(target.instance.id))?;
        let job = self.locator.get_job(&instance.job_name)?;

        let parameters = parameters.unwrap_or(target.parameters);
        let execution = self
            .launcher
            .run(&job, parameters)
            .map_err(|error| attribute_job(error, &instance.job_name))?;

        tracing::info!(
            job = %instance.job_name,
            execution_id = execution.id.0,
            restarted_from = execution_id.0,
            status = %execution.status,
            "restarted job execution"
        );

        self.track(&execution)?;
        Ok(execution)
    }

    /// Records a stop request. Steps must observe it to actually halt.
    pub fn stop(&self, execution_id: ExecutionId) -> OrchestrationResult<JobExecution> {
        let mut execution = self.require_execution(execution_id)?;
        if !execution.is_running() {
            return Err(CoreError::new(
                CoreErrorKind::NotRunning,
                format!(
                    "job execution '{}' is not running (status {})",
                    execution_id.0, execution.status
                ),
            )
            .with_job(execution.job_name())
            .with_execution(execution_id));
        }

        execution.request_stop(SystemTime::now());
        self.repository.update(&mut execution)?;
        self.active.refresh(execution.clone())?;

        tracing::info!(
            job = %execution.job_name(),
            execution_id = execution_id.0,
            "requested job execution stop"
        );
        Ok(execution)
    }

    pub fn abandon(&self, execution_id: ExecutionId) -> OrchestrationResult<JobExecution> {
        let mut execution = self.require_execution(execution_id)?;
        if !execution.status.can_abandon() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidTransition,
                format!(
                    "job execution '{}' cannot be abandoned from status {}",
                    execution_id.0, execution.status
                ),
            )
            .with_job(execution.job_name())
            .with_execution(execution_id));
        }

        execution.mark_abandoned(SystemTime::now());
        self.repository.update(&mut execution)?;
        self.active.remove(execution_id)?;

        tracing::info!(
            job = %execution.job_name(),
            execution_id = execution_id.0,
            "abandoned job execution"
        );
        Ok(execution)
    }

    /// Signals every execution the repository reports as running, including
    /// ones this process did not launch. Returns how many were signaled.
    pub fn stop_all(&self) -> OrchestrationResult<usize> {
        let mut signaled = 0;
        for execution in self.query.running_executions()? {
            match self.stop(execution.id) {
                Ok(_) => signaled += 1,
                Err(error) if error.kind == CoreErrorKind::NotRunning => {
                    tracing::debug!(
                        execution_id = execution.id.0,
                        "job execution finished before it could be stopped"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(signaled)
    }

    /// Feeds an auto-retry decision back through [`JobOrchestrator::launch`].
    pub fn relaunch(&self, request: &RestartRequest) -> OrchestrationResult<JobExecution> {
        tracing::info!(
            job = %request.job_name,
            source_execution = request.source_execution.0,
            "relaunching job after transient failure"
        );
        self.launch(&request.job_name, request.parameters.clone())
    }

    /// Drops tracked executions the repository no longer reports as running.
    pub fn remove_inactive_executions(&self) -> usize {
        let mut removed = 0;
        for tracked in self.active.snapshot() {
            match self.query.execution(tracked.id) {
                Ok(Some(current)) if !current.is_running() => {
                    match self.active.remove(current.id) {
                        Ok(_) => {
                            removed += 1;
                            tracing::debug!(
                                execution_id = current.id.0,
                                status = %current.status,
                                "job execution is no longer active"
                            );
                        }
                        Err(error) => tracing::error!(
                            execution_id = current.id.0,
                            kind = ?error.kind,
                            message = %error.message,
                            "failed to drop inactive job execution"
                        ),
                    }
                }
                Ok(Some(current)) => {
                    if let Err(error) = self.active.refresh(current) {
                        tracing::error!(
                            execution_id = tracked.id.0,
                            message = %error.message,
                            "failed to refresh active job execution"
                        );
                    }
                }
                Ok(None) => tracing::error!(
                    execution_id = tracked.id.0,
                    job = %tracked.job_name(),
                    "tracked job execution is missing from the repository"
                ),
                Err(error) => tracing::error!(
                    execution_id = tracked.id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to load tracked job execution"
                ),
            }
        }
        removed
    }

    pub fn active_executions(&self) -> Vec<JobExecution> {
        self.active.snapshot()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn job_names(&self) -> BTreeSet<String> {
        self.locator.job_names()
    }

    /// The execution with its context loaded. A context that fails to load
    /// is logged and replaced by an empty one.
    pub fn execution(&self, execution_id: ExecutionId) -> OrchestrationResult<JobExecution> {
        let mut execution = self.require_execution(execution_id)?;
        execution.execution_context = match self.query.execution_context(execution_id) {
            Ok(context) => context,
            Err(error) => {
                tracing::warn!(
                    execution_id = execution_id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "cannot load job execution context"
                );
                ExecutionContext::new()
            }
        };
        Ok(execution)
    }

    pub fn step_execution(
        &self,
        execution_id: ExecutionId,
        step_id: StepExecutionId,
    ) -> OrchestrationResult<StepExecution> {
        self.require_execution(execution_id)?;
        self.require_step(execution_id, step_id)
    }

    pub fn executions_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> OrchestrationResult<Vec<JobExecution>> {
        self.query
            .instance(instance_id)?
            .ok_or_else(|| no_such_instance(instance_id))?;
        self.query.executions_for_instance(instance_id)
    }

    pub fn running_executions(&self) -> OrchestrationResult<Vec<JobExecution>> {
        self.query.running_executions()
    }

    pub fn step_execution_history(
        &self,
        job_name: &str,
        step_name: &str,
        limit: usize,
    ) -> OrchestrationResult<StepExecutionHistory> {
        self.history_excluding(job_name, step_name, limit, None)
    }

    /// Estimates progress of one step against earlier runs of the same step.
    pub fn step_execution_progress(
        &self,
        execution_id: ExecutionId,
        step_id: StepExecutionId,
        now: SystemTime,
    ) -> OrchestrationResult<StepExecutionProgress> {
        let execution = self.require_execution(execution_id)?;
        let step = self.require_step(execution_id, step_id)?;
        let history = self.history_excluding(
            execution.job_name(),
            &step.step_name,
            PROGRESS_HISTORY_WINDOW,
            Some(step.id),
        )?;
        Ok(StepExecutionProgress::estimate(&step, &history, now))
    }

    fn history_excluding(
        &self,
        job_name: &str,
        step_name: &str,
        limit: usize,
        exclude: Option<StepExecutionId>,
    ) -> OrchestrationResult<StepExecutionHistory> {
        let steps = self
            .query
            .step_executions_for_step(job_name, step_name, limit)?;
        let mut history = StepExecutionHistory::new(step_name);
        history.extend(steps.iter().filter(|step| Some(step.id) != exclude));
        Ok(history)
    }

    fn track(&self, execution: &JobExecution) -> OrchestrationResult<()> {
        if execution.is_running() {
            self.active.insert(execution.clone())?;
        }
        Ok(())
    }

    fn require_execution(&self, execution_id: ExecutionId) -> OrchestrationResult<JobExecution> {
        self.query
            .execution(execution_id)?
            .ok_or_else(|| CoreError::no_such_execution(execution_id))
    }

    fn require_step(
        &self,
        execution_id: ExecutionId,
        step_id: StepExecutionId,
    ) -> OrchestrationResult<StepExecution> {
        let mut step = self
            .query
            .step_execution(execution_id, step_id)?
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::NoSuchStepExecution,
                    format!(
                        "no step execution with id '{}' in job execution '{}'",
                        step_id.0, execution_id.0
                    ),
                )
                .with_execution(execution_id)
            })?;
        step.execution_context = match self.query.step_execution_context(step_id) {
            Ok(context) => context,
            Err(error) => {
                tracing::warn!(
                    execution_id = execution_id.0,
                    step_execution_id = step_id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "cannot load step execution context"
                );
                ExecutionContext::new()
            }
        };
        Ok(step)
    }
}

fn attribute_job(error: CoreError, job_name: &str) -> CoreError {
    CoreError {
        job: error.job.or_else(|| Some(job_name.to_string())),
        ..error
    }
}

fn no_such_instance(instance_id: InstanceId) -> CoreError {
    CoreError::new(
        CoreErrorKind::NoSuchJobInstance,
        format!("no job instance with id '{}'", instance_id.0),
    )
}
