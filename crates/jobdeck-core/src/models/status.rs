use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job or step execution.
///
/// Variants are declared in lifecycle order, but ordering is defined by
/// [`BatchStatus::rank`]: COMPLETED ranks lowest so that "worse than" checks
/// such as `status.is_greater_than(BatchStatus::Started)` read naturally.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Completed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 8] = [
        Self::Starting,
        Self::Started,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
        Self::Completed,
        Self::Abandoned,
        Self::Unknown,
    ];

    pub fn rank(self) -> u8 {
        match self {
            Self::Completed => 1,
            Self::Starting => 2,
            Self::Started => 3,
            Self::Stopping => 4,
            Self::Stopped => 5,
            Self::Failed => 6,
            Self::Abandoned => 7,
            Self::Unknown => 8,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    pub fn is_unsuccessful(self) -> bool {
        self != Self::Completed
    }

    /// Abandon is only legal once an execution has stopped, is stopping, or failed.
    pub fn can_abandon(self) -> bool {
        !matches!(self, Self::Completed | Self::Starting | Self::Started)
    }

    pub fn is_greater_than(self, other: BatchStatus) -> bool {
        self.rank() > other.rank()
    }

    pub fn is_less_than(self, other: BatchStatus) -> bool {
        self.rank() < other.rank()
    }

    pub fn max(self, other: BatchStatus) -> BatchStatus {
        if other.is_greater_than(self) { other } else { self }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
            Self::Abandoned => "ABANDONED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Ord for BatchStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for BatchStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or(())
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}
