use std::sync::Arc;
use std::time::SystemTime;

use crate::job::Job;
use crate::models::{CoreError, CoreErrorKind, JobExecution, JobParameters};
use crate::persistence::{JobLauncher, JobRepository, PersistenceResult};

/// Launcher that records a new execution in the repository and marks it
/// STARTED. Running the job's steps is left to whoever observes the
/// repository; this launcher never blocks on step work.
#[derive(Clone)]
pub struct RepositoryJobLauncher {
    repository: Arc<dyn JobRepository>,
}

impl RepositoryJobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }
}

impl JobLauncher for RepositoryJobLauncher {
    fn run(&self, job: &Job, parameters: JobParameters) -> PersistenceResult<JobExecution> {
        job.validate(&parameters)?;

        if let Some(last) = self.repository.last_execution(job.name(), &parameters)? {
            if last.is_running() {
                return Err(CoreError::new(
                    CoreErrorKind::AlreadyRunning,
                    format!("job execution '{}' is already running", last.id.0),
                )
                .with_job(job.name())
                .with_execution(last.id));
            }
            if !job.is_restartable() {
                return Err(CoreError::new(
                    CoreErrorKind::RestartNotAllowed,
                    format!("job '{}' is not restartable", job.name()),
                )
                .with_job(job.name())
                .with_execution(last.id));
            }
        }

        let mut execution = self.repository.create_execution(job.name(), &parameters)?;
        execution.mark_started(SystemTime::now());
        self.repository.update(&mut execution)?;

        tracing::debug!(
            job = %job.name(),
            execution_id = execution.id.0,
            instance_id = execution.instance.id.0,
            "job execution started"
        );

        Ok(execution)
    }
}
