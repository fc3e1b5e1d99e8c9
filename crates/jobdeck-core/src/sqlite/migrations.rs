#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_job_repository_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS job_instances (
    instance_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_name TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    UNIQUE (job_name, identity_key)
);

CREATE TABLE IF NOT EXISTS job_executions (
    execution_id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id INTEGER NOT NULL REFERENCES job_instances (instance_id),
    parameters_json TEXT NOT NULL,
    status TEXT NOT NULL,
    exit_code TEXT NOT NULL,
    exit_description TEXT NOT NULL DEFAULT '',
    create_time_ms INTEGER NOT NULL,
    start_time_ms INTEGER,
    end_time_ms INTEGER,
    last_updated_ms INTEGER,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_job_executions_instance
    ON job_executions (instance_id, execution_id DESC);

CREATE INDEX IF NOT EXISTS idx_job_executions_status
    ON job_executions (status);

CREATE TABLE IF NOT EXISTS step_executions (
    step_execution_id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES job_executions (execution_id),
    step_name TEXT NOT NULL,
    status TEXT NOT NULL,
    exit_code TEXT NOT NULL,
    exit_description TEXT NOT NULL DEFAULT '',
    read_count INTEGER NOT NULL DEFAULT 0,
    write_count INTEGER NOT NULL DEFAULT 0,
    filter_count INTEGER NOT NULL DEFAULT 0,
    read_skip_count INTEGER NOT NULL DEFAULT 0,
    process_skip_count INTEGER NOT NULL DEFAULT 0,
    write_skip_count INTEGER NOT NULL DEFAULT 0,
    commit_count INTEGER NOT NULL DEFAULT 0,
    rollback_count INTEGER NOT NULL DEFAULT 0,
    start_time_ms INTEGER NOT NULL,
    end_time_ms INTEGER,
    last_updated_ms INTEGER,
    terminate_only INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_step_executions_execution
    ON step_executions (execution_id, step_execution_id);

CREATE INDEX IF NOT EXISTS idx_step_executions_name
    ON step_executions (step_name, step_execution_id DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_step_executions_name;
DROP INDEX IF EXISTS idx_step_executions_execution;
DROP TABLE IF EXISTS step_executions;
DROP INDEX IF EXISTS idx_job_executions_status;
DROP INDEX IF EXISTS idx_job_executions_instance;
DROP TABLE IF EXISTS job_executions;
DROP TABLE IF EXISTS job_instances;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_execution_contexts",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS execution_contexts (
    owner_kind TEXT NOT NULL,
    owner_id INTEGER NOT NULL,
    context_json TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (owner_kind, owner_id)
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS execution_contexts;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
