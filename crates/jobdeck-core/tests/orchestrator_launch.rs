use std::sync::Arc;
use std::time::SystemTime;

use jobdeck_core::config::OrchestratorConfig;
use jobdeck_core::job::{Job, RequiredKeysValidator, RunIdIncrementer};
use jobdeck_core::launcher::RepositoryJobLauncher;
use jobdeck_core::models::{
    BatchStatus, CoreErrorKind, ErrorCategory, ExecutionId, ExitStatus, JobExecution,
    JobParameters, ParameterValue,
};
use jobdeck_core::orchestration::JobOrchestrator;
use jobdeck_core::persistence::{ExecutionQuery, InMemoryJobStore, JobRepository};
use jobdeck_core::registry::JobRegistry;

fn orchestrator(jobs: Vec<Job>) -> (Arc<InMemoryJobStore>, JobOrchestrator) {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(JobRegistry::with_jobs(jobs).unwrap());
    let launcher = Arc::new(RepositoryJobLauncher::new(store.clone()));
    let orchestrator = JobOrchestrator::new(
        registry,
        launcher,
        store.clone(),
        store.clone(),
        OrchestratorConfig::default(),
    );
    (store, orchestrator)
}

fn finish(store: &InMemoryJobStore, id: ExecutionId, status: BatchStatus) -> JobExecution {
    let mut execution = store.execution(id).unwrap().unwrap();
    execution.finish(status, ExitStatus::new(status.as_str()), SystemTime::now());
    store.update(&mut execution).unwrap();
    execution
}

fn run_id(execution: &JobExecution) -> Option<i64> {
    execution
        .parameters
        .get("run.id")
        .and_then(|parameter| parameter.value.as_long())
}

fn incrementing_job() -> Job {
    Job::new("nightly").with_incrementer(Arc::new(RunIdIncrementer::new()))
}

#[test]
fn first_launch_is_never_a_restart() {
    let (_, orchestrator) = orchestrator(vec![incrementing_job()]);

    let execution = orchestrator
        .launch("nightly", JobParameters::new())
        .unwrap();

    assert_eq!(execution.status, BatchStatus::Started);
    assert_eq!(run_id(&execution), Some(1));
    assert_eq!(orchestrator.active_executions(), vec![execution.clone()]);
}

#[test]
fn failed_execution_is_restarted_without_incrementing() {
    let (store, orchestrator) = orchestrator(vec![incrementing_job()]);
    let first = orchestrator
        .launch("nightly", JobParameters::new())
        .unwrap();
    finish(&store, first.id, BatchStatus::Failed);

    let second = orchestrator
        .launch("nightly", first.parameters.clone())
        .unwrap();

    assert_ne!(second.id, first.id);
    assert_eq!(second.instance.id, first.instance.id);
    assert_eq!(run_id(&second), Some(1));
    assert_eq!(
        store.executions_for_instance(first.instance.id).unwrap().len(),
        2
    );
}

#[test]
fn completed_and_abandoned_executions_get_fresh_parameters() {
    for terminal in [BatchStatus::Completed, BatchStatus::Abandoned] {
        let (store, orchestrator) = orchestrator(vec![incrementing_job()]);
        let first = orchestrator
            .launch("nightly", JobParameters::new())
            .unwrap();
        finish(&store, first.id, terminal);

        let second = orchestrator
            .launch("nightly", first.parameters.clone())
            .unwrap();

        assert_eq!(run_id(&second), Some(2), "after {terminal}");
        assert_ne!(second.instance.id, first.instance.id);
    }
}

#[test]
fn launching_a_running_instance_again_conflicts() {
    let (_, orchestrator) = orchestrator(vec![Job::new("import")]);
    let parameters = JobParameters::new().with_string("input", "a.csv");

    let first = orchestrator.launch("import", parameters.clone()).unwrap();
    let error = orchestrator.launch("import", parameters).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::AlreadyRunning);
    assert_eq!(error.category(), ErrorCategory::Conflict);
    assert_eq!(error.job.as_deref(), Some("import"));
    assert_eq!(orchestrator.active_executions().len(), 1);
    assert_eq!(orchestrator.active_executions()[0].id, first.id);
}

#[test]
fn non_identifying_parameters_do_not_create_a_new_instance() {
    let (_, orchestrator) = orchestrator(vec![Job::new("import")]);
    let first = JobParameters::new()
        .with_string("input", "a.csv")
        .with_parameter(
            "requested_by",
            ParameterValue::String("alice".to_string()),
            false,
        );
    let second = JobParameters::new()
        .with_string("input", "a.csv")
        .with_parameter(
            "requested_by",
            ParameterValue::String("bob".to_string()),
            false,
        );

    orchestrator.launch("import", first).unwrap();
    let error = orchestrator.launch("import", second).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::AlreadyRunning);
}

#[test]
fn separator_characters_in_values_still_yield_distinct_instances() {
    let (store, orchestrator) = orchestrator(vec![Job::new("import")]);
    let packed = JobParameters::new().with_string("a", "x;b=string:y");
    let split = JobParameters::new()
        .with_string("a", "x")
        .with_string("b", "y");

    let first = orchestrator.launch("import", packed).unwrap();
    finish(&store, first.id, BatchStatus::Completed);

    let second = orchestrator.launch("import", split).unwrap();

    assert_ne!(second.instance.id, first.instance.id);
    assert_eq!(second.status, BatchStatus::Started);
}

#[test]
fn completed_instance_without_incrementer_cannot_run_again() {
    let (store, orchestrator) = orchestrator(vec![Job::new("import")]);
    let parameters = JobParameters::new().with_string("input", "a.csv");
    let first = orchestrator.launch("import", parameters.clone()).unwrap();
    finish(&store, first.id, BatchStatus::Completed);

    let error = orchestrator.launch("import", parameters).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::InstanceAlreadyComplete);
    assert_eq!(error.category(), ErrorCategory::Conflict);
}

#[test]
fn non_restartable_job_rejects_a_second_attempt() {
    let (store, orchestrator) = orchestrator(vec![Job::new("once").restartable(false)]);
    let parameters = JobParameters::new().with_long("batch", 7);
    let first = orchestrator.launch("once", parameters.clone()).unwrap();
    finish(&store, first.id, BatchStatus::Failed);

    let error = orchestrator.launch("once", parameters).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::RestartNotAllowed);
}

#[test]
fn unknown_job_is_not_found() {
    let (_, orchestrator) = orchestrator(vec![Job::new("import")]);

    let error = orchestrator
        .launch("export", JobParameters::new())
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::NoSuchJob);
    assert_eq!(error.category(), ErrorCategory::NotFound);
    assert!(orchestrator.active_executions().is_empty());
}

#[test]
fn validator_rejects_missing_parameters() {
    let job = Job::new("import").with_validator(Arc::new(RequiredKeysValidator::new(["input"])));
    let (_, orchestrator) = orchestrator(vec![job]);

    let error = orchestrator
        .launch("import", JobParameters::new())
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::InvalidParameters);
    assert!(error.message.contains("input"));
}

#[test]
fn restart_by_id_reuses_instance_parameters_or_overrides() {
    let (store, orchestrator) = orchestrator(vec![Job::new("import")]);
    let parameters = JobParameters::new()
        .with_string("input", "a.csv")
        .with_parameter(
            "chunk",
            ParameterValue::Long(100),
            false,
        );
    let first = orchestrator.launch("import", parameters.clone()).unwrap();
    finish(&store, first.id, BatchStatus::Stopped);

    let restarted = orchestrator.restart(first.id, None).unwrap();
    assert_eq!(restarted.instance.id, first.instance.id);
    assert_eq!(restarted.parameters, parameters);
    assert!(orchestrator
        .active_executions()
        .iter()
        .any(|execution| execution.id == restarted.id));

    finish(&store, restarted.id, BatchStatus::Failed);
    let overrides = JobParameters::new()
        .with_string("input", "a.csv")
        .with_parameter(
            "chunk",
            ParameterValue::Long(10),
            false,
        );
    let again = orchestrator
        .restart(restarted.id, Some(overrides.clone()))
        .unwrap();
    assert_eq!(again.parameters, overrides);
    assert_eq!(again.instance.id, first.instance.id);
}

#[test]
fn restart_of_unknown_execution_is_not_found() {
    let (_, orchestrator) = orchestrator(vec![Job::new("import")]);

    let error = orchestrator.restart(ExecutionId(42), None).unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::NoSuchJobExecution);
    assert_eq!(error.execution, Some(ExecutionId(42)));
}

#[test]
fn job_names_come_from_the_locator() {
    let (_, orchestrator) = orchestrator(vec![Job::new("import"), Job::new("export")]);

    let names: Vec<String> = orchestrator.job_names().into_iter().collect();

    assert_eq!(names, vec!["export".to_string(), "import".to_string()]);
}
