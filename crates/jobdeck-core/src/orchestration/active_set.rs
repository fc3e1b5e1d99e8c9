use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::{CoreError, CoreErrorKind, ExecutionId, JobExecution};
use crate::orchestration::OrchestrationResult;

/// Executions this process launched and still believes are running.
///
/// Not persisted. After a restart the repository is the only source of truth.
#[derive(Default)]
pub struct ActiveExecutionSet {
    executions: Mutex<HashMap<ExecutionId, JobExecution>>,
}

impl ActiveExecutionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, execution: JobExecution) -> OrchestrationResult<()> {
        self.lock()?.insert(execution.id, execution);
        Ok(())
    }

    /// Replaces the tracked snapshot only if the id is still tracked.
    pub fn refresh(&self, execution: JobExecution) -> OrchestrationResult<bool> {
        let mut executions = self.lock()?;
        match executions.get_mut(&execution.id) {
            Some(tracked) => {
                *tracked = execution;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove(&self, id: ExecutionId) -> OrchestrationResult<Option<JobExecution>> {
        Ok(self.lock()?.remove(&id))
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.read(|executions| executions.contains_key(&id))
    }

    pub fn len(&self) -> usize {
        self.read(HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the tracked executions ordered by id; iteration happens
    /// outside the lock so callers may hit the repository per entry.
    pub fn snapshot(&self) -> Vec<JobExecution> {
        let mut executions: Vec<JobExecution> =
            self.read(|executions| executions.values().cloned().collect());
        executions.sort_by_key(|execution| execution.id);
        executions
    }

    fn lock(&self) -> OrchestrationResult<MutexGuard<'_, HashMap<ExecutionId, JobExecution>>> {
        self.executions.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "active execution set mutex poisoned")
        })
    }

    fn read<R>(&self, reader: impl FnOnce(&HashMap<ExecutionId, JobExecution>) -> R) -> R {
        match self.executions.lock() {
            Ok(executions) => reader(&executions),
            Err(poisoned) => reader(&poisoned.into_inner()),
        }
    }
}
