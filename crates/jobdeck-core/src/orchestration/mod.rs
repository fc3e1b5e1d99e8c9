pub mod active_set;
pub mod orchestrator;
pub mod shutdown;
pub mod sweeper;

pub use active_set::ActiveExecutionSet;
pub use orchestrator::{JobOrchestrator, PROGRESS_HISTORY_WINDOW};
pub use sweeper::{InactiveExecutionSweeper, SweepHandle};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
