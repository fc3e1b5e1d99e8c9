use std::time::SystemTime;

use serde::Serialize;

use crate::models::StepExecution;
use crate::statistics::StepExecutionHistory;

/// Time-based completion estimate for one step execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepExecutionProgress {
    pub step_name: String,
    pub percentage_complete: f64,
    pub finished: bool,
    pub duration_ms: f64,
    pub history_count: u64,
    pub history_mean_ms: f64,
}

impl StepExecutionProgress {
    /// Elapsed time compared against the mean of past durations, capped at 1.0.
    /// Without history, or when past runs averaged zero time, the estimate is 0.
    pub fn estimate(
        step: &StepExecution,
        history: &StepExecutionHistory,
        now: SystemTime,
    ) -> Self {
        let duration_ms = step.elapsed(now).as_nanos() as f64 / 1_000_000.0;
        let mean = history.duration.mean();

        let percentage_complete = if history.duration.is_empty() || mean <= 0.0 {
            0.0
        } else {
            (duration_ms / mean.max(1.0)).min(1.0)
        };

        Self {
            step_name: step.step_name.clone(),
            percentage_complete,
            finished: step.is_finished(),
            duration_ms,
            history_count: history.count(),
            history_mean_ms: mean,
        }
    }

    pub fn summary(&self) -> String {
        if self.finished {
            return format!(
                "step '{}' finished after {:.0} ms",
                self.step_name, self.duration_ms
            );
        }
        if self.history_count == 0 {
            return format!(
                "step '{}' has been running for {:.0} ms; no history to estimate from",
                self.step_name, self.duration_ms
            );
        }
        format!(
            "step '{}' is an estimated {:.0}% complete after {:.0} ms (mean of {} prior runs: {:.0} ms)",
            self.step_name,
            self.percentage_complete * 100.0,
            self.duration_ms,
            self.history_count,
            self.history_mean_ms
        )
    }
}
