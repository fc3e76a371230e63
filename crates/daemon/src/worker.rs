//! Worker pool
//!
//! Each worker pulls the highest-priority entry from the dispatch queue,
//! claims the job, runs the executor on the blocking thread pool with a
//! bounded number of retries, and records the outcome.

use crate::events::JobEventKind;
use crate::executor::{CompressionOutput, CompressionRequest, ExecutorError};
use crate::jobs::CompressionJob;
use crate::queue::QueueCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Running workers and the token that stops them.
pub(crate) struct WorkerPool {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(core: Arc<QueueCore>, workers: usize) -> Self {
        let token = CancellationToken::new();
        let handles = (0..workers)
            .map(|worker_id| {
                let core = core.clone();
                let token = token.clone();
                tokio::spawn(async move { worker_loop(worker_id, core, token).await })
            })
            .collect();

        Self { token, handles }
    }

    /// Signal the workers without waiting for them.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Signal the workers and join them, waiting at most `timeout` in total.
    ///
    /// Workers still busy at the deadline are left to finish on their own.
    pub(crate) async fn shutdown(self, timeout: Duration) {
        self.token.cancel();
        let deadline = tokio::time::Instant::now() + timeout;
        for (worker_id, handle) in self.handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker_id, error = %e, "worker task ended abnormally"),
                Err(_) => warn!(
                    worker_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "worker did not stop in time"
                ),
            }
        }
    }
}

async fn worker_loop(worker_id: usize, core: Arc<QueueCore>, token: CancellationToken) {
    debug!(worker_id, "worker started");
    let poll_interval = core.settings.poll_interval;

    while !token.is_cancelled() {
        let entry = tokio::select! {
            _ = token.cancelled() => break,
            entry = core.dispatch.pop_timeout(poll_interval) => entry,
        };
        let Some(entry) = entry else {
            continue;
        };

        let Some(job) = core.claim(&entry) else {
            debug!(worker_id, job_id = %entry.job_id, "discarding stale dispatch entry");
            continue;
        };

        info!(worker_id, job_id = %job.job_id, priority = %job.priority, "processing job");
        emit(&core, JobEventKind::Started, job.clone()).await;

        let outcome = run_with_retries(&core, &job).await;

        if let Some((kind, finished)) = core.finish(&job.job_id, outcome) {
            match kind {
                JobEventKind::Completed => info!(
                    worker_id,
                    job_id = %finished.job_id,
                    input_size = finished.input_size,
                    output_size = finished.output_size,
                    "job completed"
                ),
                _ => error!(
                    worker_id,
                    job_id = %finished.job_id,
                    error = finished.error_message.as_deref().unwrap_or(""),
                    "job failed"
                ),
            }
            emit(&core, kind, finished).await;
        }
    }

    debug!(worker_id, "worker stopped");
}

/// Run user callbacks on the blocking pool so a slow callback does not stall
/// the runtime. Awaited, so events for one job keep their order.
async fn emit(core: &Arc<QueueCore>, kind: JobEventKind, job: CompressionJob) {
    let core = core.clone();
    let job_id = job.job_id.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || core.events.emit(kind, &job)).await {
        error!(job_id = %job_id, event = %kind, error = %e, "event delivery task failed");
    }
}

/// Run the executor up to `max_retries + 1` times.
///
/// Returns the successful output, or the failure message for the last attempt.
async fn run_with_retries(
    core: &QueueCore,
    job: &CompressionJob,
) -> Result<CompressionOutput, String> {
    let request = CompressionRequest::from(job);
    let attempts = core.settings.max_retries + 1;
    let mut last_failure = String::new();

    for attempt in 1..=attempts {
        let executor = core.executor.clone();
        let req = request.clone();
        let result = tokio::task::spawn_blocking(move || executor.compress(&req))
            .await
            .unwrap_or_else(|e| Err(ExecutorError::Panicked(e.to_string())));

        last_failure = match result {
            Ok(output) if output.success => return Ok(output),
            Ok(_) => "Compression failed after all retries".to_string(),
            Err(e) => format!("Compression failed: {}", e),
        };

        if attempt < attempts {
            warn!(
                job_id = %job.job_id,
                attempt,
                attempts,
                reason = %last_failure,
                "compression attempt failed, retrying"
            );
            tokio::time::sleep(core.settings.retry_delay).await;
        }
    }

    Err(last_failure)
}
