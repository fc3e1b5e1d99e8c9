use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::models::{CoreError, CoreErrorKind, JobParameters, ParameterValue};

pub type JobResult<T> = Result<T, CoreError>;

/// Derives the parameters for the next fresh launch of a job.
pub trait JobParametersIncrementer: Send + Sync {
    fn next(&self, parameters: &JobParameters) -> JobParameters;
}

pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, job_name: &str, parameters: &JobParameters) -> JobResult<()>;
}

pub const RUN_ID_KEY: &str = "run.id";

/// Bumps a long `run.id` parameter, starting at 1.
#[derive(Clone, Debug)]
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self::with_key(RUN_ID_KEY)
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, parameters: &JobParameters) -> JobParameters {
        let current = parameters
            .get(&self.key)
            .and_then(|parameter| parameter.value.as_long())
            .unwrap_or(0);
        parameters
            .clone()
            .with_parameter(self.key.clone(), ParameterValue::Long(current + 1), true)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequiredKeysValidator {
    required: Vec<String>,
}

impl RequiredKeysValidator {
    pub fn new(required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl JobParametersValidator for RequiredKeysValidator {
    fn validate(&self, job_name: &str, parameters: &JobParameters) -> JobResult<()> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !parameters.contains(key))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(CoreError::new(
            CoreErrorKind::InvalidParameters,
            format!("missing required parameters: {}", missing.join(", ")),
        )
        .with_job(job_name))
    }
}

/// A launchable job definition. Step logic lives outside this crate; the
/// definition only carries what launch decisions need.
#[derive(Clone)]
pub struct Job {
    name: String,
    restartable: bool,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
    validator: Option<Arc<dyn JobParametersValidator>>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            restartable: true,
            incrementer: None,
            validator: None,
        }
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn with_incrementer(mut self, incrementer: Arc<dyn JobParametersIncrementer>) -> Self {
        self.incrementer = Some(incrementer);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn JobParametersValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer.as_deref()
    }

    pub fn validate(&self, parameters: &JobParameters) -> JobResult<()> {
        match &self.validator {
            Some(validator) => validator.validate(&self.name, parameters),
            None => Ok(()),
        }
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("restartable", &self.restartable)
            .field("incrementer", &self.incrementer.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_incrementer_starts_at_one_and_keeps_other_entries() {
        let incrementer = RunIdIncrementer::new();
        let first = incrementer.next(&JobParameters::new().with_string("input", "a.csv"));
        assert_eq!(
            first.get(RUN_ID_KEY).and_then(|p| p.value.as_long()),
            Some(1)
        );
        assert!(first.contains("input"));

        let second = incrementer.next(&first);
        assert_eq!(
            second.get(RUN_ID_KEY).and_then(|p| p.value.as_long()),
            Some(2)
        );
    }

    #[test]
    fn required_keys_validator_names_missing_keys() {
        let job = Job::new("payroll")
            .with_validator(Arc::new(RequiredKeysValidator::new(["month", "region"])));

        let error = job
            .validate(&JobParameters::new().with_string("month", "2024-01"))
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidParameters);
        assert_eq!(error.job.as_deref(), Some("payroll"));
        assert!(error.message.contains("region"));

        assert!(
            job.validate(
                &JobParameters::new()
                    .with_string("month", "2024-01")
                    .with_string("region", "eu")
            )
            .is_ok()
        );
    }
}
