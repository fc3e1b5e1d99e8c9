use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestration::JobOrchestrator;

/// Background task that periodically drops finished executions from the
/// orchestrator's active set.
pub struct InactiveExecutionSweeper;

impl InactiveExecutionSweeper {
    /// Sweeps on the configured `sweep_interval_ms`.
    pub fn start(orchestrator: Arc<JobOrchestrator>) -> SweepHandle {
        let period = orchestrator.config().sweep_interval();
        Self::spawn(orchestrator, period)
    }

    /// Must be called from within a tokio runtime. The first sweep runs
    /// immediately.
    pub fn spawn(orchestrator: Arc<JobOrchestrator>, period: Duration) -> SweepHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => sweep(orchestrator.clone()).await,
                }
            }
            tracing::debug!("inactive execution sweeper stopped");
        });

        SweepHandle { shutdown, task }
    }
}

async fn sweep(orchestrator: Arc<JobOrchestrator>) {
    match tokio::task::spawn_blocking(move || orchestrator.remove_inactive_executions()).await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "swept inactive job executions"),
        Err(join_error) => tracing::error!(
            message = %join_error,
            "inactive execution sweep panicked"
        ),
    }
}

pub struct SweepHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signals the sweeper and waits for any in-flight sweep to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(join_error) = self.task.await {
            tracing::error!(
                message = %join_error,
                "inactive execution sweeper ended abnormally"
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
