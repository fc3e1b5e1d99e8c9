use std::thread;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::{JobOrchestrator, OrchestrationResult};

impl JobOrchestrator {
    /// Stops every execution this process is tracking and waits, bounded by
    /// the configured shutdown timeout, for them to leave the running states.
    ///
    /// Blocks the calling thread. Executions still running when the budget
    /// is spent are logged and left behind. The first stop failure other
    /// than a not-running conflict is returned after the wait.
    pub fn destroy(&self) -> OrchestrationResult<()> {
        let tracked = self.active_executions();
        tracing::info!(count = tracked.len(), "stopping active job executions");

        let mut first_error: Option<CoreError> = None;
        for execution in tracked {
            match self.stop(execution.id) {
                Ok(_) => {}
                Err(error) if error.kind == CoreErrorKind::NotRunning => {
                    tracing::debug!(
                        execution_id = execution.id.0,
                        "job execution already stopped"
                    );
                }
                Err(error) => {
                    tracing::error!(
                        execution_id = execution.id.0,
                        job = %execution.job_name(),
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to stop job execution during shutdown"
                    );
                    first_error.get_or_insert(error);
                }
            }
        }

        let budget = self.config().shutdown_poll_budget();
        let interval = self.config().shutdown_poll_interval();
        for poll in 1..=budget {
            self.remove_inactive_executions();
            let remaining = self.active_count();
            if remaining == 0 {
                break;
            }
            if poll == budget {
                tracing::warn!(
                    remaining,
                    timeout_ms = self.config().shutdown_timeout_ms,
                    "job executions still running after shutdown timeout"
                );
                break;
            }
            tracing::info!(remaining, "waiting for job executions to stop");
            thread::sleep(interval);
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
