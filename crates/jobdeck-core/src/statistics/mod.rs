pub mod cumulative;
pub mod progress;

pub use cumulative::{CumulativeHistory, StepExecutionHistory};
pub use progress::StepExecutionProgress;
