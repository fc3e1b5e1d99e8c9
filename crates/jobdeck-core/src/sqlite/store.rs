use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::models::{
    BatchStatus, CoreError, CoreErrorKind, ExecutionContext, ExecutionId, ExitStatus, InstanceId,
    JobExecution, JobInstance, JobParameters, StepExecution, StepExecutionId,
};
use crate::persistence::{ExecutionQuery, JobRepository, MigrationStore, PersistenceResult};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migrations};

const MIGRATIONS_TABLE: &str = "jobdeck_schema_migrations";

const JOB_CONTEXT: &str = "job";
const STEP_CONTEXT: &str = "step";

const EXECUTION_SELECT: &str = "
SELECT e.execution_id, e.instance_id, i.job_name, i.identity_key, e.parameters_json,
       e.status, e.exit_code, e.exit_description, e.create_time_ms, e.start_time_ms,
       e.end_time_ms, e.last_updated_ms, e.version
FROM job_executions e
JOIN job_instances i ON i.instance_id = e.instance_id
";

const STEP_SELECT: &str = "
SELECT s.step_execution_id, s.execution_id, s.step_name, s.status, s.exit_code,
       s.exit_description, s.read_count, s.write_count, s.filter_count, s.read_skip_count,
       s.process_skip_count, s.write_skip_count, s.commit_count, s.rollback_count,
       s.start_time_ms, s.end_time_ms, s.last_updated_ms, s.terminate_only, s.version
FROM step_executions s
";

const RUNNING_STATUSES: [&str; 3] = ["STARTING", "STARTED", "STOPPING"];

/// Job repository backed by a SQLite file. Every operation opens its own
/// connection, so the store is cheap to share across threads.
pub struct SqliteJobStore {
    database_path: PathBuf,
}

enum CreateOutcome {
    Created(JobExecution),
    Running(ExecutionId),
    Complete(ExecutionId),
}

enum VersionedWrite {
    Written,
    Missing,
    Stale(u64),
}

impl SqliteJobStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteJobStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // A recorded version with missing tables is repaired by
                // replaying the idempotent DDL.
                for migration in migrations()
                    .iter()
                    .filter(|entry| entry.version <= target_version)
                {
                    connection.execute_batch(migration.up_sql)?;
                }
                return Ok(());
            }

            if target_version > current_version {
                for migration in migrations().iter().filter(|entry| {
                    entry.version > current_version && entry.version <= target_version
                }) {
                    apply_up_migration(connection, migration)?;
                }
            } else {
                for migration in migrations()
                    .iter()
                    .rev()
                    .filter(|entry| entry.version > target_version && entry.version <= current_version)
                {
                    apply_down_migration(connection, migration)?;
                }
            }

            Ok(())
        })
    }
}

impl JobRepository for SqliteJobStore {
    fn last_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<Option<JobExecution>> {
        let identity_key = parameters.identity_key();
        self.with_connection("last_execution", |connection| {
            ensure_schema_ready(connection)?;
            let execution = connection
                .query_row(
                    &format!(
                        "{EXECUTION_SELECT}
WHERE i.job_name = ?1 AND i.identity_key = ?2
ORDER BY e.execution_id DESC
LIMIT 1"
                    ),
                    params![job_name, identity_key],
                    read_execution,
                )
                .optional()?;
            execution
                .map(|execution| with_steps(connection, execution))
                .transpose()
        })
    }

    fn create_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> PersistenceResult<JobExecution> {
        let identity_key = parameters.identity_key();
        let parameters_json = to_json(parameters)?;
        let now = truncate_to_millis(SystemTime::now());

        let outcome = self.with_connection("create_execution", |connection| {
            ensure_schema_ready(connection)?;
            let transaction =
                connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing: Option<i64> = transaction
                .query_row(
                    "SELECT instance_id FROM job_instances WHERE job_name = ?1 AND identity_key = ?2",
                    params![job_name, identity_key],
                    |row| row.get(0),
                )
                .optional()?;

            let instance_id = match existing {
                Some(instance_id) => {
                    let mut statement = transaction.prepare(
                        "
SELECT execution_id, status FROM job_executions
WHERE instance_id = ?1
ORDER BY execution_id DESC
",
                    )?;
                    let prior = statement
                        .query_map(params![instance_id], |row| {
                            let execution_id: i64 = row.get(0)?;
                            let status_raw: String = row.get(1)?;
                            Ok((
                                ExecutionId(i64_to_u64(execution_id)?),
                                parse_batch_status(&status_raw)?,
                            ))
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;

                    if let Some((running, _)) =
                        prior.iter().find(|(_, status)| status.is_running())
                    {
                        return Ok(CreateOutcome::Running(*running));
                    }
                    if let Some((done, _)) = prior.iter().find(|(_, status)| {
                        matches!(status, BatchStatus::Completed | BatchStatus::Abandoned)
                    }) {
                        return Ok(CreateOutcome::Complete(*done));
                    }
                    instance_id
                }
                None => {
                    transaction.execute(
                        "INSERT INTO job_instances (job_name, identity_key) VALUES (?1, ?2)",
                        params![job_name, identity_key],
                    )?;
                    transaction.last_insert_rowid()
                }
            };

            let instance = JobInstance {
                id: InstanceId(i64_to_u64(instance_id)?),
                job_name: job_name.to_string(),
                identity_key: identity_key.clone(),
            };
            let mut execution =
                JobExecution::new(ExecutionId(0), instance, parameters.clone(), now);

            transaction.execute(
                "
INSERT INTO job_executions (
    instance_id, parameters_json, status, exit_code, exit_description,
    create_time_ms, start_time_ms, end_time_ms, last_updated_ms, version
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
",
                params![
                    instance_id,
                    parameters_json,
                    execution.status.as_str(),
                    execution.exit_status.exit_code,
                    execution.exit_status.exit_description,
                    to_unix_millis(execution.create_time)?,
                    optional_millis(execution.start_time)?,
                    optional_millis(execution.end_time)?,
                    optional_millis(execution.last_updated)?,
                    u64_to_i64(execution.version)?,
                ],
            )?;
            execution.id = ExecutionId(i64_to_u64(transaction.last_insert_rowid())?);
            transaction.commit()?;
            Ok(CreateOutcome::Created(execution))
        })?;

        match outcome {
            CreateOutcome::Created(execution) => Ok(execution),
            CreateOutcome::Running(running) => Err(CoreError::new(
                CoreErrorKind::AlreadyRunning,
                format!(
                    "a job execution for this instance is already running: '{}'",
                    running.0
                ),
            )
            .with_job(job_name)
            .with_execution(running)),
            CreateOutcome::Complete(done) => Err(CoreError::new(
                CoreErrorKind::InstanceAlreadyComplete,
                "a job instance already exists and is complete for these parameters",
            )
            .with_job(job_name)
            .with_execution(done)),
        }
    }

    fn update(&self, execution: &mut JobExecution) -> PersistenceResult<()> {
        let outcome = self.with_connection("update", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE job_executions
SET status = ?3, exit_code = ?4, exit_description = ?5, start_time_ms = ?6,
    end_time_ms = ?7, last_updated_ms = ?8, version = version + 1
WHERE execution_id = ?1 AND version = ?2
",
                params![
                    u64_to_i64(execution.id.0)?,
                    u64_to_i64(execution.version)?,
                    execution.status.as_str(),
                    execution.exit_status.exit_code,
                    execution.exit_status.exit_description,
                    optional_millis(execution.start_time)?,
                    optional_millis(execution.end_time)?,
                    optional_millis(execution.last_updated)?,
                ],
            )?;
            if updated > 0 {
                return Ok(VersionedWrite::Written);
            }
            stored_version(
                connection,
                "SELECT version FROM job_executions WHERE execution_id = ?1",
                execution.id.0,
            )
        })?;

        match outcome {
            VersionedWrite::Written => {
                execution.version += 1;
                Ok(())
            }
            VersionedWrite::Missing => Err(CoreError::no_such_execution(execution.id)),
            VersionedWrite::Stale(stored) => Err(CoreError::new(
                CoreErrorKind::StaleVersion,
                format!(
                    "job execution '{}' was updated concurrently (stored version {}, given {})",
                    execution.id.0, stored, execution.version
                ),
            )
            .with_execution(execution.id)),
        }
    }

    fn add_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()> {
        let context_json = to_json(&step.execution_context)?;
        let inserted = self.with_connection("add_step_execution", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            let exists: Option<i64> = transaction
                .query_row(
                    "SELECT execution_id FROM job_executions WHERE execution_id = ?1",
                    params![u64_to_i64(step.job_execution_id.0)?],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            transaction.execute(
                "
INSERT INTO step_executions (
    execution_id, step_name, status, exit_code, exit_description, read_count,
    write_count, filter_count, read_skip_count, process_skip_count, write_skip_count,
    commit_count, rollback_count, start_time_ms, end_time_ms, last_updated_ms,
    terminate_only, version
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 0)
",
                params![
                    u64_to_i64(step.job_execution_id.0)?,
                    step.step_name,
                    step.status.as_str(),
                    step.exit_status.exit_code,
                    step.exit_status.exit_description,
                    u64_to_i64(step.read_count)?,
                    u64_to_i64(step.write_count)?,
                    u64_to_i64(step.filter_count)?,
                    u64_to_i64(step.read_skip_count)?,
                    u64_to_i64(step.process_skip_count)?,
                    u64_to_i64(step.write_skip_count)?,
                    u64_to_i64(step.commit_count)?,
                    u64_to_i64(step.rollback_count)?,
                    to_unix_millis(step.start_time)?,
                    optional_millis(step.end_time)?,
                    optional_millis(step.last_updated)?,
                    bool_to_sqlite(step.terminate_only),
                ],
            )?;
            let step_id = transaction.last_insert_rowid();
            write_context(&transaction, STEP_CONTEXT, step_id, &context_json)?;
            transaction.commit()?;
            Ok(Some(i64_to_u64(step_id)?))
        })?;

        match inserted {
            Some(step_id) => {
                step.id = StepExecutionId(step_id);
                step.version = 0;
                Ok(())
            }
            None => Err(CoreError::no_such_execution(step.job_execution_id)),
        }
    }

    fn update_step_execution(&self, step: &mut StepExecution) -> PersistenceResult<()> {
        let context_json = to_json(&step.execution_context)?;
        let outcome = self.with_connection("update_step_execution", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            let updated = transaction.execute(
                "
UPDATE step_executions
SET status = ?3, exit_code = ?4, exit_description = ?5, read_count = ?6,
    write_count = ?7, filter_count = ?8, read_skip_count = ?9,
    process_skip_count = ?10, write_skip_count = ?11, commit_count = ?12,
    rollback_count = ?13, end_time_ms = ?14, last_updated_ms = ?15,
    terminate_only = ?16, version = version + 1
WHERE step_execution_id = ?1 AND version = ?2
",
                params![
                    u64_to_i64(step.id.0)?,
                    u64_to_i64(step.version)?,
                    step.status.as_str(),
                    step.exit_status.exit_code,
                    step.exit_status.exit_description,
                    u64_to_i64(step.read_count)?,
                    u64_to_i64(step.write_count)?,
                    u64_to_i64(step.filter_count)?,
                    u64_to_i64(step.read_skip_count)?,
                    u64_to_i64(step.process_skip_count)?,
                    u64_to_i64(step.write_skip_count)?,
                    u64_to_i64(step.commit_count)?,
                    u64_to_i64(step.rollback_count)?,
                    optional_millis(step.end_time)?,
                    optional_millis(step.last_updated)?,
                    bool_to_sqlite(step.terminate_only),
                ],
            )?;
            if updated == 0 {
                return stored_version(
                    &transaction,
                    "SELECT version FROM step_executions WHERE step_execution_id = ?1",
                    step.id.0,
                );
            }
            write_context(
                &transaction,
                STEP_CONTEXT,
                u64_to_i64(step.id.0)?,
                &context_json,
            )?;
            transaction.commit()?;
            Ok(VersionedWrite::Written)
        })?;

        match outcome {
            VersionedWrite::Written => {
                step.version += 1;
                Ok(())
            }
            VersionedWrite::Missing => Err(no_such_step(step.id)),
            VersionedWrite::Stale(_) => Err(CoreError::new(
                CoreErrorKind::StaleVersion,
                format!("step execution '{}' was updated concurrently", step.id.0),
            )
            .with_execution(step.job_execution_id)),
        }
    }

    fn update_execution_context(
        &self,
        execution: ExecutionId,
        context: &ExecutionContext,
    ) -> PersistenceResult<()> {
        let context_json = to_json(context)?;
        let written = self.with_connection("update_execution_context", |connection| {
            ensure_schema_ready(connection)?;
            let execution_id = u64_to_i64(execution.0)?;
            if !execution_exists(connection, execution_id)? {
                return Ok(false);
            }
            write_context(connection, JOB_CONTEXT, execution_id, &context_json)?;
            Ok(true)
        })?;

        if written {
            Ok(())
        } else {
            Err(CoreError::no_such_execution(execution))
        }
    }
}

impl ExecutionQuery for SqliteJobStore {
    fn execution(&self, id: ExecutionId) -> PersistenceResult<Option<JobExecution>> {
        self.with_connection("execution", |connection| {
            ensure_schema_ready(connection)?;
            let execution = connection
                .query_row(
                    &format!("{EXECUTION_SELECT} WHERE e.execution_id = ?1"),
                    params![u64_to_i64(id.0)?],
                    read_execution,
                )
                .optional()?;
            execution
                .map(|execution| with_steps(connection, execution))
                .transpose()
        })
    }

    fn instance(&self, id: InstanceId) -> PersistenceResult<Option<JobInstance>> {
        self.with_connection("instance", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT instance_id, job_name, identity_key FROM job_instances WHERE instance_id = ?1",
                    params![u64_to_i64(id.0)?],
                    |row| {
                        Ok(JobInstance {
                            id: InstanceId(i64_to_u64(row.get(0)?)?),
                            job_name: row.get(1)?,
                            identity_key: row.get(2)?,
                        })
                    },
                )
                .optional()
        })
    }

    fn executions_for_instance(&self, id: InstanceId) -> PersistenceResult<Vec<JobExecution>> {
        self.with_connection("executions_for_instance", |connection| {
            ensure_schema_ready(connection)?;
            let executions = query_executions(
                connection,
                &format!("{EXECUTION_SELECT} WHERE e.instance_id = ?1 ORDER BY e.execution_id DESC"),
                params![u64_to_i64(id.0)?],
            )?;
            executions
                .into_iter()
                .map(|execution| with_steps(connection, execution))
                .collect()
        })
    }

    fn running_executions(&self) -> PersistenceResult<Vec<JobExecution>> {
        self.with_connection("running_executions", |connection| {
            ensure_schema_ready(connection)?;
            let executions = query_executions(
                connection,
                &format!(
                    "{EXECUTION_SELECT} WHERE e.status IN (?1, ?2, ?3) ORDER BY e.execution_id"
                ),
                params![RUNNING_STATUSES[0], RUNNING_STATUSES[1], RUNNING_STATUSES[2]],
            )?;
            executions
                .into_iter()
                .map(|execution| with_steps(connection, execution))
                .collect()
        })
    }

    fn step_executions(&self, execution: ExecutionId) -> PersistenceResult<Vec<StepExecution>> {
        self.with_connection("step_executions", |connection| {
            ensure_schema_ready(connection)?;
            load_steps(connection, execution)
        })
    }

    fn step_execution(
        &self,
        execution: ExecutionId,
        step: StepExecutionId,
    ) -> PersistenceResult<Option<StepExecution>> {
        self.with_connection("step_execution", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!("{STEP_SELECT} WHERE s.step_execution_id = ?1 AND s.execution_id = ?2"),
                    params![u64_to_i64(step.0)?, u64_to_i64(execution.0)?],
                    read_step,
                )
                .optional()
        })
    }

    fn step_executions_for_step(
        &self,
        job_name: &str,
        step_name: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<StepExecution>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("step_executions_for_step", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "{STEP_SELECT}
JOIN job_executions e ON e.execution_id = s.execution_id
JOIN job_instances i ON i.instance_id = e.instance_id
WHERE s.step_name = ?1 AND i.job_name = ?2
ORDER BY s.step_execution_id DESC
LIMIT ?3"
            ))?;
            let rows = statement.query_map(params![step_name, job_name, to_i64(limit)?], read_step)?;
            rows.collect()
        })
    }

    fn execution_context(&self, execution: ExecutionId) -> PersistenceResult<ExecutionContext> {
        let context = self.with_connection("execution_context", |connection| {
            ensure_schema_ready(connection)?;
            let execution_id = u64_to_i64(execution.0)?;
            if !execution_exists(connection, execution_id)? {
                return Ok(None);
            }
            read_context(connection, JOB_CONTEXT, execution_id).map(Some)
        })?;
        context.ok_or_else(|| CoreError::no_such_execution(execution))
    }

    fn step_execution_context(
        &self,
        step: StepExecutionId,
    ) -> PersistenceResult<ExecutionContext> {
        let context = self.with_connection("step_execution_context", |connection| {
            ensure_schema_ready(connection)?;
            let step_id = u64_to_i64(step.0)?;
            let exists: Option<i64> = connection
                .query_row(
                    "SELECT step_execution_id FROM step_executions WHERE step_execution_id = ?1",
                    params![step_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }
            read_context(connection, STEP_CONTEXT, step_id).map(Some)
        })?;
        context.ok_or_else(|| no_such_step(step))
    }
}

fn read_execution(row: &Row<'_>) -> rusqlite::Result<JobExecution> {
    let parameters_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;

    Ok(JobExecution {
        id: ExecutionId(i64_to_u64(row.get(0)?)?),
        instance: JobInstance {
            id: InstanceId(i64_to_u64(row.get(1)?)?),
            job_name: row.get(2)?,
            identity_key: row.get(3)?,
        },
        parameters: from_json(&parameters_raw, "job parameters")?,
        status: parse_batch_status(&status_raw)?,
        exit_status: ExitStatus {
            exit_code: row.get(6)?,
            exit_description: row.get(7)?,
        },
        create_time: from_unix_millis(row.get(8)?)?,
        start_time: optional_time(row.get(9)?)?,
        end_time: optional_time(row.get(10)?)?,
        last_updated: optional_time(row.get(11)?)?,
        version: i64_to_u64(row.get(12)?)?,
        step_executions: Vec::new(),
        execution_context: ExecutionContext::new(),
    })
}

fn read_step(row: &Row<'_>) -> rusqlite::Result<StepExecution> {
    let status_raw: String = row.get(3)?;

    Ok(StepExecution {
        id: StepExecutionId(i64_to_u64(row.get(0)?)?),
        job_execution_id: ExecutionId(i64_to_u64(row.get(1)?)?),
        step_name: row.get(2)?,
        status: parse_batch_status(&status_raw)?,
        exit_status: ExitStatus {
            exit_code: row.get(4)?,
            exit_description: row.get(5)?,
        },
        read_count: i64_to_u64(row.get(6)?)?,
        write_count: i64_to_u64(row.get(7)?)?,
        filter_count: i64_to_u64(row.get(8)?)?,
        read_skip_count: i64_to_u64(row.get(9)?)?,
        process_skip_count: i64_to_u64(row.get(10)?)?,
        write_skip_count: i64_to_u64(row.get(11)?)?,
        commit_count: i64_to_u64(row.get(12)?)?,
        rollback_count: i64_to_u64(row.get(13)?)?,
        start_time: from_unix_millis(row.get(14)?)?,
        end_time: optional_time(row.get(15)?)?,
        last_updated: optional_time(row.get(16)?)?,
        terminate_only: sqlite_to_bool(row.get(17)?),
        version: i64_to_u64(row.get(18)?)?,
        execution_context: ExecutionContext::new(),
    })
}

fn query_executions(
    connection: &Connection,
    sql: &str,
    parameters: impl rusqlite::Params,
) -> rusqlite::Result<Vec<JobExecution>> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map(parameters, read_execution)?;
    rows.collect()
}

fn with_steps(connection: &Connection, mut execution: JobExecution) -> rusqlite::Result<JobExecution> {
    execution.step_executions = load_steps(connection, execution.id)?;
    Ok(execution)
}

fn load_steps(connection: &Connection, execution: ExecutionId) -> rusqlite::Result<Vec<StepExecution>> {
    let mut statement = connection.prepare(&format!(
        "{STEP_SELECT} WHERE s.execution_id = ?1 ORDER BY s.step_execution_id"
    ))?;
    let rows = statement.query_map(params![u64_to_i64(execution.0)?], read_step)?;
    rows.collect()
}

fn execution_exists(connection: &Connection, execution_id: i64) -> rusqlite::Result<bool> {
    let found: Option<i64> = connection
        .query_row(
            "SELECT execution_id FROM job_executions WHERE execution_id = ?1",
            params![execution_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn stored_version(connection: &Connection, sql: &str, id: u64) -> rusqlite::Result<VersionedWrite> {
    let version: Option<i64> = connection
        .query_row(sql, params![u64_to_i64(id)?], |row| row.get(0))
        .optional()?;
    match version {
        Some(version) => Ok(VersionedWrite::Stale(i64_to_u64(version)?)),
        None => Ok(VersionedWrite::Missing),
    }
}

fn write_context(
    connection: &Connection,
    owner_kind: &str,
    owner_id: i64,
    context_json: &str,
) -> rusqlite::Result<()> {
    connection.execute(
        "
INSERT INTO execution_contexts (owner_kind, owner_id, context_json, updated_at_ms)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(owner_kind, owner_id) DO UPDATE SET
    context_json = excluded.context_json,
    updated_at_ms = excluded.updated_at_ms
",
        params![
            owner_kind,
            owner_id,
            context_json,
            to_unix_millis(SystemTime::now())?
        ],
    )?;
    Ok(())
}

fn read_context(
    connection: &Connection,
    owner_kind: &str,
    owner_id: i64,
) -> rusqlite::Result<ExecutionContext> {
    let raw: Option<String> = connection
        .query_row(
            "SELECT context_json FROM execution_contexts WHERE owner_kind = ?1 AND owner_id = ?2",
            params![owner_kind, owner_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => from_json(&raw, "execution context"),
        None => Ok(ExecutionContext::new()),
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(
        "
CREATE TABLE IF NOT EXISTS jobdeck_schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
",
    )?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(&format!(
            "database schema is at version {version}; apply migrations before job repository operations"
        )));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}

fn no_such_step(step: StepExecutionId) -> CoreError {
    CoreError::new(
        CoreErrorKind::NoSuchStepExecution,
        format!("no step execution with id '{}'", step.0),
    )
}

fn parse_batch_status(raw: &str) -> rusqlite::Result<BatchStatus> {
    raw.parse::<BatchStatus>().map_err(|_| {
        storage_error_sqlite(&format!("unknown batch status '{raw}' in sqlite record"))
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> PersistenceResult<String> {
    serde_json::to_string(value)
        .map_err(|error| storage_error_text("encode_json", error.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|error| storage_error_sqlite(&format!("corrupt {what} in sqlite record: {error}")))
}

fn bool_to_sqlite(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn sqlite_to_bool(value: i64) -> bool {
    value != 0
}

fn truncate_to_millis(value: SystemTime) -> SystemTime {
    match value.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => UNIX_EPOCH + Duration::from_millis(elapsed.as_millis() as u64),
        Err(_) => value,
    }
}

fn to_unix_millis(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_millis())
        .map_err(|_| storage_error_sqlite("unix timestamp millis exceed i64 range"))
}

fn from_unix_millis(value: i64) -> rusqlite::Result<SystemTime> {
    let millis = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_millis(millis))
}

fn optional_millis(value: Option<SystemTime>) -> rusqlite::Result<Option<i64>> {
    value.map(to_unix_millis).transpose()
}

fn optional_time(value: Option<i64>) -> rusqlite::Result<Option<SystemTime>> {
    value.map(from_unix_millis).transpose()
}

fn u64_to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative id or counter in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}
