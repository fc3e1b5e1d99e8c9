pub mod dedup;
pub mod retry;

pub use dedup::DuplicateExecutionFilter;
pub use retry::{AutoRetryClassifier, RestartRequest, RetryMarker};
