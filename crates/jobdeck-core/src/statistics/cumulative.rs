use std::time::Duration;

use serde::Serialize;

use crate::models::StepExecution;

/// Single-pass running statistics over an unbounded stream of samples.
///
/// Keeps O(1) state (Welford's update): count, min, max, mean and the sum of
/// squared deviations from the mean.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CumulativeHistory {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl CumulativeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Per-step accumulator of completed step executions.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepExecutionHistory {
    step_name: String,
    pub duration: CumulativeHistory,
    pub duration_per_read: CumulativeHistory,
    pub read_count: CumulativeHistory,
    pub write_count: CumulativeHistory,
    pub filter_count: CumulativeHistory,
    pub read_skip_count: CumulativeHistory,
    pub write_skip_count: CumulativeHistory,
    pub process_skip_count: CumulativeHistory,
    pub commit_count: CumulativeHistory,
    pub rollback_count: CumulativeHistory,
}

impl StepExecutionHistory {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            ..Self::default()
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn count(&self) -> u64 {
        self.duration.count()
    }

    /// Folds in one finished step execution; running steps are ignored.
    pub fn append(&mut self, step: &StepExecution) {
        let Some(end_time) = step.end_time else {
            return;
        };
        let elapsed = end_time
            .duration_since(step.start_time)
            .unwrap_or(Duration::ZERO);
        let duration_ms = elapsed.as_nanos() as f64 / 1_000_000.0;

        self.duration.append(duration_ms);
        if step.read_count > 0 {
            self.duration_per_read
                .append(duration_ms / step.read_count as f64);
        }
        self.read_count.append(step.read_count as f64);
        self.write_count.append(step.write_count as f64);
        self.filter_count.append(step.filter_count as f64);
        self.read_skip_count.append(step.read_skip_count as f64);
        self.write_skip_count.append(step.write_skip_count as f64);
        self.process_skip_count
            .append(step.process_skip_count as f64);
        self.commit_count.append(step.commit_count as f64);
        self.rollback_count.append(step.rollback_count as f64);
    }
}

impl<'a> Extend<&'a StepExecution> for StepExecutionHistory {
    fn extend<T: IntoIterator<Item = &'a StepExecution>>(&mut self, steps: T) {
        for step in steps {
            self.append(step);
        }
    }
}
