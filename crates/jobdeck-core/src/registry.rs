use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use crate::job::Job;
use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{JobLocator, PersistenceResult};

/// In-process [`JobLocator`] backed by explicit registrations.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> PersistenceResult<Self> {
        let registry = Self::new();
        for job in jobs {
            registry.register(job)?;
        }
        Ok(registry)
    }

    pub fn register(&self, job: Job) -> PersistenceResult<()> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(job.name()) {
            return Err(CoreError::new(
                CoreErrorKind::DuplicateRegistration,
                format!("duplicate job registration for '{}'", job.name()),
            )
            .with_job(job.name()));
        }
        jobs.insert(job.name().to_string(), Arc::new(job));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        match self.jobs.write() {
            Ok(mut jobs) => jobs.remove(name).is_some(),
            Err(_) => false,
        }
    }
}

impl JobLocator for JobRegistry {
    fn get_job(&self, name: &str) -> PersistenceResult<Arc<Job>> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        jobs.get(name).cloned().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::NoSuchJob,
                format!("no job configuration with the name '{name}' was registered"),
            )
            .with_job(name)
        })
    }

    fn job_names(&self) -> BTreeSet<String> {
        match self.jobs.read() {
            Ok(jobs) => jobs.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }
}

fn poisoned() -> CoreError {
    CoreError::new(CoreErrorKind::Internal, "job registry lock poisoned")
}
