pub mod error;
pub mod execution;
pub mod parameters;
pub mod status;

pub use error::{CoreError, CoreErrorKind, ErrorCategory};
pub use execution::{
    ExecutionContext, ExecutionId, InstanceId, JobExecution, JobInstance, StepExecution,
    StepExecutionId,
};
pub use parameters::{JobParameter, JobParameters, ParameterValue};
pub use status::{BatchStatus, ExitStatus};
