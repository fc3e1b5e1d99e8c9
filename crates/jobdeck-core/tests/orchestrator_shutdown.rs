use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use jobdeck_core::config::OrchestratorConfig;
use jobdeck_core::job::Job;
use jobdeck_core::launcher::RepositoryJobLauncher;
use jobdeck_core::models::{
    BatchStatus, CoreError, CoreErrorKind, ExecutionContext, ExecutionId, ExitStatus,
    JobExecution, JobParameters, StepExecution,
};
use jobdeck_core::orchestration::{InactiveExecutionSweeper, JobOrchestrator};
use jobdeck_core::persistence::{
    ExecutionQuery, InMemoryJobStore, JobRepository, PersistenceResult,
};
use jobdeck_core::registry::JobRegistry;

fn quick_config() -> OrchestratorConfig {
    OrchestratorConfig {
        shutdown_timeout_ms: 200,
        shutdown_poll_interval_ms: 50,
        ..OrchestratorConfig::default()
    }
}

fn orchestrator_with(
    store: Arc<InMemoryJobStore>,
    repository: Arc<dyn JobRepository>,
    config: OrchestratorConfig,
) -> JobOrchestrator {
    let registry = Arc::new(JobRegistry::with_jobs([Job::new("import")]).unwrap());
    let launcher = Arc::new(RepositoryJobLauncher::new(store.clone()));
    JobOrchestrator::new(registry, launcher, repository, store, config)
}

fn input(value: &str) -> JobParameters {
    JobParameters::new().with_string("input", value)
}

fn finish(store: &InMemoryJobStore, id: ExecutionId, status: BatchStatus) {
    let mut execution = store.execution(id).unwrap().unwrap();
    execution.finish(status, ExitStatus::new(status.as_str()), SystemTime::now());
    store.update(&mut execution).unwrap();
}

#[test]
fn destroy_with_nothing_active_returns_immediately() {
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator_with(store.clone(), store, OrchestratorConfig::default());

    let started = Instant::now();
    orchestrator.destroy().unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn destroy_gives_up_on_a_stuck_execution_after_the_timeout() {
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator_with(store.clone(), store.clone(), quick_config());
    let stuck = orchestrator.launch("import", input("a")).unwrap();

    let started = Instant::now();
    orchestrator.destroy().unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "waited {elapsed:?}");
    assert_eq!(orchestrator.active_count(), 1);
    assert_eq!(
        store.execution(stuck.id).unwrap().unwrap().status,
        BatchStatus::Stopping
    );
}

#[test]
fn destroy_returns_once_signaled_executions_stop() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = OrchestratorConfig {
        shutdown_timeout_ms: 10_000,
        shutdown_poll_interval_ms: 20,
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator_with(store.clone(), store.clone(), config);
    let execution = orchestrator.launch("import", input("a")).unwrap();

    let worker_store = store.clone();
    let worker = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let current = worker_store.execution(execution.id).unwrap().unwrap();
            if current.status == BatchStatus::Stopping {
                finish(&worker_store, execution.id, BatchStatus::Stopped);
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    });

    let started = Instant::now();
    orchestrator.destroy().unwrap();

    assert!(worker.join().unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(orchestrator.active_count(), 0);
}

#[test]
fn destroy_treats_already_finished_executions_as_benign() {
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = orchestrator_with(store.clone(), store.clone(), quick_config());
    let execution = orchestrator.launch("import", input("a")).unwrap();
    finish(&store, execution.id, BatchStatus::Completed);

    orchestrator.destroy().unwrap();

    assert_eq!(orchestrator.active_count(), 0);
}

/// Repository whose updates always fail; everything else goes to the store.
struct RejectingUpdates {
    inner: Arc<InMemoryJobStore>,
}

impl JobRepository for RejectingUpdates {
    fn last_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<Option<JobExecution>> {
        self.inner.last_execution(job_name, parameters)
    }

    fn create_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<JobExecution> {
        self.inner.create_execution(job_name, parameters)
    }

    fn update(&self, execution: &mut JobExecution) -> PersistenceResult<()> {
        Err(CoreError::new(
            CoreErrorKind::StorageFailure,
            format!("repository offline while updating '{}'", execution.id.0),
        ))
    }

    fn add_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()> {
        self.inner.add_step_execution(step)
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()> {
        self.inner.update_step_execution(step)
    }

    fn update_execution_context(
        &self,
        execution: ExecutionId,
        context: &ExecutionContext,
    ) -> PersistenceResult<()> {
        self.inner.update_execution_context(execution, context)
    }
}

#[test]
fn destroy_reraises_the_first_signal_failure_after_waiting() {
    let store = Arc::new(InMemoryJobStore::new());
    let repository = Arc::new(RejectingUpdates {
        inner: store.clone(),
    });
    let orchestrator = orchestrator_with(store.clone(), repository, quick_config());
    let first = orchestrator.launch("import", input("a")).unwrap();
    let second = orchestrator.launch("import", input("b")).unwrap();

    let started = Instant::now();
    let error = orchestrator.destroy().unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains(&format!("'{}'", first.id.0)));
    assert!(started.elapsed() >= Duration::from_millis(200));
    // A failed stop does not prevent the remaining executions from being tried.
    assert_eq!(orchestrator.active_count(), 2);
    assert!(orchestrator
        .active_executions()
        .iter()
        .any(|execution| execution.id == second.id));
}

#[tokio::test]
async fn sweeper_drops_finished_executions_in_the_background() {
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = Arc::new(orchestrator_with(
        store.clone(),
        store.clone(),
        OrchestratorConfig::default(),
    ));
    let finished = orchestrator.launch("import", input("a")).unwrap();
    let running = orchestrator.launch("import", input("b")).unwrap();
    finish(&store, finished.id, BatchStatus::Completed);

    let handle = InactiveExecutionSweeper::spawn(orchestrator.clone(), Duration::from_millis(20));

    let mut remaining = orchestrator.active_count();
    for _ in 0..100 {
        remaining = orchestrator.active_count();
        if remaining == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert_eq!(remaining, 1);
    assert_eq!(orchestrator.active_executions()[0].id, running.id);
}

#[tokio::test]
async fn sweeper_shutdown_stops_further_sweeps() {
    let store = Arc::new(InMemoryJobStore::new());
    let orchestrator = Arc::new(orchestrator_with(
        store.clone(),
        store.clone(),
        OrchestratorConfig {
            sweep_interval_ms: 20,
            ..OrchestratorConfig::default()
        },
    ));

    let handle = InactiveExecutionSweeper::start(orchestrator.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.shutdown().await;

    let execution = orchestrator.launch("import", input("a")).unwrap();
    finish(&store, execution.id, BatchStatus::Completed);
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(orchestrator.active_count(), 1);
}
