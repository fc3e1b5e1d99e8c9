use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::ExecutionId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NoSuchJob,
    NoSuchJobExecution,
    NoSuchJobInstance,
    NoSuchStepExecution,
    AlreadyRunning,
    InstanceAlreadyComplete,
    RestartNotAllowed,
    InvalidParameters,
    StaleVersion,
    DuplicateRegistration,
    NotRunning,
    InvalidTransition,
    StorageFailure,
    Internal,
}

/// Coarse grouping callers use to decide how to react to a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    NotRunning,
    Transient,
}

impl CoreErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::NoSuchJob
            | Self::NoSuchJobExecution
            | Self::NoSuchJobInstance
            | Self::NoSuchStepExecution => ErrorCategory::NotFound,
            Self::AlreadyRunning
            | Self::InstanceAlreadyComplete
            | Self::RestartNotAllowed
            | Self::InvalidParameters
            | Self::StaleVersion
            | Self::DuplicateRegistration => ErrorCategory::Conflict,
            Self::NotRunning | Self::InvalidTransition => ErrorCategory::NotRunning,
            Self::StorageFailure | Self::Internal => ErrorCategory::Transient,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub job: Option<String>,
    pub execution: Option<ExecutionId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            job: None,
            execution: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_execution(mut self, execution: ExecutionId) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn no_such_execution(execution: ExecutionId) -> Self {
        Self::new(
            CoreErrorKind::NoSuchJobExecution,
            format!("no job execution with id '{}'", execution.0),
        )
        .with_execution(execution)
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for CoreError {}
