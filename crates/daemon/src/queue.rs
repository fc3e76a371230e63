//! Job queue coordinator
//!
//! [`JobQueue`] owns the job table and is the only entry point for callers:
//! submission, cancellation, queries, statistics, event hooks and the
//! start/stop lifecycle of the worker pool.
//!
//! Locking rules:
//! - The job table (and the set of jobs owned by live workers) sits behind
//!   one mutex. Snapshots are written while holding it.
//! - The dispatch queue has its own lock and is never touched while the
//!   table lock is held.
//! - Callbacks run with no lock held.

use crate::config::{Config, RecoveryPolicy};
use crate::concurrency::derive_plan;
use crate::dispatch::{DispatchEntry, DispatchQueue};
use crate::error::{QueueError, Result};
use crate::events::{EventHub, JobEvent, JobEventKind};
use crate::executor::{CompressionExecutor, CompressionOutput};
use crate::jobs::{CompressionJob, JobStatus};
use crate::rate_limit::RateLimiter;
use crate::store::{JobStore, JobTable};
use crate::worker::WorkerPool;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Runtime settings for a [`JobQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub workers: u32,
    pub persist_file: PathBuf,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub recover_running: RecoveryPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl QueueSettings {
    /// Settings from configuration, resolving the worker count.
    pub fn from_config(cfg: &Config) -> Self {
        let plan = derive_plan(cfg);
        let q = &cfg.queue;
        Self {
            workers: plan.workers,
            persist_file: q.persist_file.clone(),
            rate_limit: q.rate_limit_per_minute,
            rate_window: Duration::from_secs(q.rate_window_secs.max(1)),
            max_retries: q.max_retries,
            retry_delay: Duration::from_millis(q.retry_delay_ms),
            poll_interval: Duration::from_millis(q.poll_interval_ms),
            stop_timeout: Duration::from_secs(q.stop_timeout_secs),
            recover_running: q.recover_running,
        }
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a CompressionJob>) -> Self {
        let mut stats = QueueStats::default();
        for job in jobs {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Jobs in a terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// Table contents guarded by the table lock.
#[derive(Debug, Default)]
pub(crate) struct TableState {
    pub(crate) jobs: JobTable,
    /// Ids of running jobs owned by a worker of this process.
    pub(crate) in_flight: HashSet<String>,
}

/// State shared between the coordinator and its workers.
pub(crate) struct QueueCore {
    pub(crate) settings: QueueSettings,
    pub(crate) table: Mutex<TableState>,
    pub(crate) dispatch: DispatchQueue,
    pub(crate) limiter: RateLimiter,
    pub(crate) store: JobStore,
    pub(crate) events: EventHub,
    pub(crate) executor: Arc<dyn CompressionExecutor>,
}

impl QueueCore {
    pub(crate) fn lock_table(&self) -> MutexGuard<'_, TableState> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a snapshot. Failures are logged; memory stays authoritative.
    pub(crate) fn persist_locked(&self, jobs: &JobTable) {
        if let Err(e) = self.store.save(jobs) {
            warn!(
                path = %self.store.path().display(),
                error = %e,
                "failed to persist job table, keeping in-memory state"
            );
        }
    }

    /// Move a popped job from pending to running and hand the worker a copy.
    ///
    /// Returns `None` if the id is unknown, the job is no longer pending, or
    /// the entry's sort key no longer matches the record (it was resubmitted).
    pub(crate) fn claim(&self, entry: &DispatchEntry) -> Option<CompressionJob> {
        let mut state = self.lock_table();
        let job = state.jobs.get_mut(&entry.job_id)?;
        if job.priority != entry.priority || job.created_at != entry.created_at {
            return None;
        }
        if !job.start() {
            return None;
        }
        let snapshot = job.clone();
        state.in_flight.insert(entry.job_id.clone());
        self.persist_locked(&state.jobs);
        Some(snapshot)
    }

    /// True when nothing is pending and no worker of this process holds a job.
    ///
    /// Records left running by an earlier process do not count.
    pub(crate) fn is_drained(&self) -> bool {
        let state = self.lock_table();
        state.in_flight.is_empty()
            && !state.jobs.values().any(|j| j.status == JobStatus::Pending)
    }

    /// Record the terminal outcome of a claimed job.
    pub(crate) fn finish(
        &self,
        job_id: &str,
        outcome: std::result::Result<CompressionOutput, String>,
    ) -> Option<(JobEventKind, CompressionJob)> {
        let mut state = self.lock_table();
        state.in_flight.remove(job_id);

        let Some(job) = state.jobs.get_mut(job_id) else {
            warn!(job_id = %job_id, "finished job disappeared from the table");
            return None;
        };

        let (applied, kind) = match &outcome {
            Ok(out) => (job.complete(out.input_size, out.output_size), JobEventKind::Completed),
            Err(msg) => (job.fail(msg), JobEventKind::Failed),
        };
        if !applied {
            warn!(job_id = %job_id, status = %job.status, "job left running state while in flight");
            return None;
        }

        let snapshot = job.clone();
        self.persist_locked(&state.jobs);
        Some((kind, snapshot))
    }
}

/// Persistent priority job queue for compression jobs.
///
/// Construct one per process and share it by reference or `Arc`.
pub struct JobQueue {
    core: Arc<QueueCore>,
    pool: Mutex<Option<WorkerPool>>,
}

impl JobQueue {
    /// Create a queue, loading any existing job file.
    ///
    /// Pending records are re-inserted into the dispatch queue with their
    /// original creation time. Records found running are handled per
    /// `settings.recover_running`. An unreadable job file is moved aside and
    /// the queue starts empty.
    pub fn new(settings: QueueSettings, executor: Arc<dyn CompressionExecutor>) -> Self {
        let store = JobStore::new(settings.persist_file.clone());
        let jobs = load_table(&store);

        let core = Arc::new(QueueCore {
            limiter: RateLimiter::new(settings.rate_limit, settings.rate_window),
            settings,
            table: Mutex::new(TableState::default()),
            dispatch: DispatchQueue::new(),
            store,
            events: EventHub::new(),
            executor,
        });

        let queue = Self {
            core,
            pool: Mutex::new(None),
        };
        queue.restore(jobs);
        queue
    }

    /// Create a queue from configuration.
    pub fn from_config<E: CompressionExecutor>(cfg: &Config, executor: E) -> Self {
        Self::new(QueueSettings::from_config(cfg), Arc::new(executor))
    }

    fn restore(&self, mut jobs: JobTable) {
        if jobs.is_empty() {
            return;
        }

        let mut stuck = 0usize;
        let mut requeued = 0usize;
        for job in jobs.values_mut() {
            if job.status != JobStatus::Running {
                continue;
            }
            match self.core.settings.recover_running {
                RecoveryPolicy::Leave => {
                    warn!(job_id = %job.job_id, "job was running when the previous process stopped, leaving it for manual reconciliation");
                    stuck += 1;
                }
                RecoveryPolicy::Requeue => {
                    job.requeue();
                    requeued += 1;
                }
            }
        }

        let entries: Vec<DispatchEntry> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .map(DispatchEntry::for_job)
            .collect();
        let total = jobs.len();

        {
            let mut state = self.core.lock_table();
            state.jobs = jobs;
            if requeued > 0 {
                self.core.persist_locked(&state.jobs);
            }
        }

        let pending = entries.len();
        for entry in entries {
            self.core.dispatch.push(entry);
        }

        info!(
            total,
            pending,
            requeued,
            stuck,
            path = %self.core.store.path().display(),
            "loaded jobs from persistent storage"
        );
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.core.settings
    }

    /// Submit a job.
    ///
    /// The rate limiter is consulted first; a rejected submission is not
    /// queued. An existing record with the same id is replaced unless it is
    /// currently running.
    pub fn submit(&self, mut job: CompressionJob) -> Result<String> {
        if !self.core.limiter.allow() {
            warn!(job_id = %job.job_id, "rate limit exceeded for job submission");
            return Err(QueueError::RateLimitExceeded {
                limit: self.core.limiter.cap(),
                window_secs: self.core.limiter.window().as_secs(),
            });
        }

        job.validate().map_err(QueueError::Validation)?;
        job.reset_for_submit();
        let job_id = job.job_id.clone();
        let entry = DispatchEntry::for_job(&job);

        {
            let mut state = self.core.lock_table();
            if matches!(state.jobs.get(&job_id), Some(existing) if existing.status == JobStatus::Running)
            {
                return Err(QueueError::AlreadyRunning(job_id));
            }
            info!(
                job_id = %job_id,
                priority = %job.priority,
                preset = job.preset_name.as_deref().unwrap_or("none"),
                "added job to queue"
            );
            state.jobs.insert(job_id.clone(), job);
            self.core.persist_locked(&state.jobs);
        }

        self.core.dispatch.push(entry);
        Ok(job_id)
    }

    /// Cancel a pending job. Returns false for unknown ids and any non-pending job.
    pub fn cancel(&self, job_id: &str) -> bool {
        let snapshot = {
            let mut state = self.core.lock_table();
            let Some(job) = state.jobs.get_mut(job_id) else {
                return false;
            };
            if !job.cancel() {
                return false;
            }
            let snapshot = job.clone();
            self.core.persist_locked(&state.jobs);
            snapshot
        };

        info!(job_id = %job_id, "cancelled job");
        self.core.events.emit(JobEventKind::Cancelled, &snapshot);
        true
    }

    /// Copy of the record for `job_id`.
    pub fn get_status(&self, job_id: &str) -> Result<CompressionJob> {
        self.core
            .lock_table()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    /// Copies of all records, oldest first.
    pub fn list_all(&self) -> Vec<CompressionJob> {
        self.collect(|_| true)
    }

    pub fn list_pending(&self) -> Vec<CompressionJob> {
        self.collect(|j| j.status == JobStatus::Pending)
    }

    pub fn list_running(&self) -> Vec<CompressionJob> {
        self.collect(|j| j.status == JobStatus::Running)
    }

    pub fn list_by_status(&self, status: JobStatus) -> Vec<CompressionJob> {
        self.collect(|j| j.status == status)
    }

    fn collect(&self, keep: impl Fn(&CompressionJob) -> bool) -> Vec<CompressionJob> {
        let mut jobs: Vec<CompressionJob> = self
            .core
            .lock_table()
            .jobs
            .values()
            .filter(|j| keep(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::from_jobs(self.core.lock_table().jobs.values())
    }

    /// Entries waiting in the dispatch queue, including stale ones.
    pub fn dispatch_len(&self) -> usize {
        self.core.dispatch.len()
    }

    /// Install the callback for an event, replacing any previous one.
    ///
    /// Worker events are delivered on the blocking thread pool. `Cancelled`
    /// runs on the thread that called [`cancel`](Self::cancel).
    pub fn register_callback<F>(&self, kind: JobEventKind, callback: F) -> bool
    where
        F: Fn(&CompressionJob) + Send + Sync + 'static,
    {
        self.core.events.register(kind, callback)
    }

    /// Receive every lifecycle event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.core.events.subscribe()
    }

    /// Put a running job that no live worker owns back into the queue.
    ///
    /// This is the manual reconciliation path for jobs left running by a
    /// crashed process. Returns false if the job is not in that state.
    pub fn requeue(&self, job_id: &str) -> Result<bool> {
        let entry = {
            let mut state = self.core.lock_table();
            if state.in_flight.contains(job_id) {
                return Ok(false);
            }
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
            if !job.requeue() {
                return Ok(false);
            }
            let entry = DispatchEntry::for_job(job);
            self.core.persist_locked(&state.jobs);
            entry
        };

        info!(job_id = %job_id, "requeued stuck job");
        self.core.dispatch.push(entry);
        Ok(true)
    }

    /// Remove all completed, failed and cancelled records. Returns how many went.
    pub fn purge_finished(&self) -> usize {
        let mut state = self.core.lock_table();
        let before = state.jobs.len();
        state.jobs.retain(|_, j| !j.is_terminal());
        let removed = before - state.jobs.len();
        if removed > 0 {
            self.core.persist_locked(&state.jobs);
            info!(removed, "purged finished jobs");
        }
        removed
    }

    /// Write a snapshot now and report any failure to the caller.
    pub fn flush(&self) -> Result<()> {
        let state = self.core.lock_table();
        self.core.store.save(&state.jobs)?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_pool().is_some()
    }

    /// Spawn the worker pool. Calling it again while running does nothing.
    pub async fn start(&self) {
        let mut pool = self.lock_pool();
        if pool.is_some() {
            return;
        }
        let workers = self.core.settings.workers.max(1) as usize;
        *pool = Some(WorkerPool::spawn(self.core.clone(), workers));
        info!(workers, "job queue started");
    }

    /// Signal the workers to exit, wait at most `stop_timeout` for them and
    /// write a final snapshot. Calling it when stopped does nothing.
    pub async fn stop(&self) {
        let Some(pool) = self.lock_pool().take() else {
            return;
        };

        pool.shutdown(self.core.settings.stop_timeout).await;

        let state = self.core.lock_table();
        self.core.persist_locked(&state.jobs);
        info!("job queue stopped");
    }

    /// Wait until nothing is pending and every job claimed by a worker of
    /// this queue has finished. Returns false on timeout.
    ///
    /// Jobs left running by a previous process (see `recover_running`) are
    /// not waited for.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.core.is_drained() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn lock_pool(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let Some(pool) = self.lock_pool().take() {
            pool.cancel();
        }
    }
}

fn load_table(store: &JobStore) -> JobTable {
    match store.load() {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(error = %e, "failed to load jobs, starting with an empty table");
            match store.quarantine() {
                Ok(Some(moved)) => {
                    warn!(path = %moved.display(), "moved unreadable job file aside")
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "could not move unreadable job file aside"),
            }
            JobTable::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CompressionRequest, ExecutorError};
    use crate::jobs::JobPriority;
    use tempfile::TempDir;

    fn ok_executor() -> Arc<dyn CompressionExecutor> {
        Arc::new(
            |_: &CompressionRequest| -> std::result::Result<CompressionOutput, ExecutorError> {
                Ok(CompressionOutput::succeeded(1000, 500))
            },
        )
    }

    fn settings(dir: &TempDir) -> QueueSettings {
        QueueSettings {
            workers: 1,
            persist_file: dir.path().join("jobs.json"),
            rate_limit: 1000,
            rate_window: Duration::from_secs(60),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(2),
            recover_running: RecoveryPolicy::Leave,
        }
    }

    fn make_job(id: &str) -> CompressionJob {
        CompressionJob::new(id, format!("/in/{}.wav", id), format!("/out/{}.mp3", id), 64, "mp3")
    }

    #[test]
    fn test_settings_from_default_config() {
        let s = QueueSettings::from_config(&Config::default());
        assert_eq!(s.workers, 4);
        assert_eq!(s.rate_limit, 60);
        assert_eq!(s.rate_window, Duration::from_secs(60));
        assert_eq!(s.max_retries, 2);
        assert_eq!(s.retry_delay, Duration::from_secs(1));
        assert_eq!(s.poll_interval, Duration::from_secs(1));
        assert_eq!(s.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_stats_from_jobs() {
        let mut running = make_job("r");
        running.start();
        let mut cancelled = make_job("c");
        cancelled.cancel();
        let jobs = vec![make_job("p"), running, cancelled];

        let stats = QueueStats::from_jobs(&jobs);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.finished(), 1);
        assert!(!stats.is_idle());
    }

    #[test]
    fn test_submit_persists_and_queues() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());

        let id = queue.submit(make_job("a")).unwrap();

        assert_eq!(id, "a");
        assert_eq!(queue.dispatch_len(), 1);
        assert_eq!(queue.get_status("a").unwrap().status, JobStatus::Pending);
        let on_disk = JobStore::new(dir.path().join("jobs.json")).load().unwrap();
        assert!(on_disk.contains_key("a"));
    }

    #[test]
    fn test_invalid_job_never_enters_table() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());

        let mut job = make_job("bad");
        job.bitrate = 0;

        assert!(matches!(queue.submit(job), Err(QueueError::Validation(_))));
        assert!(matches!(queue.get_status("bad"), Err(QueueError::NotFound(_))));
        assert_eq!(queue.dispatch_len(), 0);
    }

    #[test]
    fn test_submit_resets_runtime_fields() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());

        let mut job = make_job("stale");
        job.start();
        job.fail("old failure");
        queue.submit(job).unwrap();

        let stored = queue.get_status("stale").unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.error_message.is_none());
        assert!(stored.started_at.is_none());
    }

    #[test]
    fn test_resubmitting_running_job_is_rejected() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("busy")).unwrap();
        let popped = queue.core.dispatch.try_pop().unwrap();
        queue.core.claim(&popped).unwrap();

        assert!(matches!(
            queue.submit(make_job("busy")),
            Err(QueueError::AlreadyRunning(_))
        ));
    }

    #[test]
    fn test_claim_skips_non_pending() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("x")).unwrap();
        let entry = queue.core.dispatch.try_pop().unwrap();
        assert!(queue.cancel("x"));

        assert!(queue.core.claim(&entry).is_none());
        let unknown = DispatchEntry {
            job_id: "unknown".to_string(),
            ..entry
        };
        assert!(queue.core.claim(&unknown).is_none());
    }

    #[test]
    fn test_claim_skips_entry_left_by_resubmission() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("x").with_priority(JobPriority::Urgent)).unwrap();
        queue.submit(make_job("x").with_priority(JobPriority::Low)).unwrap();
        assert_eq!(queue.dispatch_len(), 2);

        let stale = queue.core.dispatch.try_pop().unwrap();
        assert_eq!(stale.priority, JobPriority::Urgent);
        assert!(queue.core.claim(&stale).is_none());
        assert_eq!(queue.get_status("x").unwrap().status, JobStatus::Pending);

        let current = queue.core.dispatch.try_pop().unwrap();
        let claimed = queue.core.claim(&current).unwrap();
        assert_eq!(claimed.priority, JobPriority::Low);
    }

    #[test]
    fn test_zero_rate_window_is_clamped() {
        let mut cfg = Config::default();
        cfg.queue.rate_window_secs = 0;
        let s = QueueSettings::from_config(&cfg);
        assert_eq!(s.rate_window, Duration::from_secs(1));
    }

    #[test]
    fn test_finish_records_outcome_and_clears_ownership() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("ok")).unwrap();
        queue.submit(make_job("ko")).unwrap();
        while let Some(entry) = queue.core.dispatch.try_pop() {
            queue.core.claim(&entry).unwrap();
        }

        let (kind, job) = queue
            .core
            .finish("ok", Ok(CompressionOutput::succeeded(10, 5)))
            .unwrap();
        assert_eq!(kind, JobEventKind::Completed);
        assert_eq!(job.output_size, 5);

        let (kind, job) = queue.core.finish("ko", Err("nope".to_string())).unwrap();
        assert_eq!(kind, JobEventKind::Failed);
        assert_eq!(job.error_message.as_deref(), Some("nope"));

        assert!(queue.core.lock_table().in_flight.is_empty());
    }

    #[test]
    fn test_requeue_only_unowned_running_jobs() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("owned")).unwrap();
        let entry = queue.core.dispatch.try_pop().unwrap();
        queue.core.claim(&entry).unwrap();

        // Owned by a live worker
        assert!(!queue.requeue("owned").unwrap());

        queue.core.lock_table().in_flight.clear();
        assert!(queue.requeue("owned").unwrap());
        assert_eq!(queue.get_status("owned").unwrap().status, JobStatus::Pending);
        assert_eq!(queue.dispatch_len(), 1);

        assert!(matches!(queue.requeue("ghost"), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_purge_finished() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("keep")).unwrap();
        queue.submit(make_job("drop")).unwrap();
        queue.cancel("drop");

        assert_eq!(queue.purge_finished(), 1);
        assert_eq!(queue.list_all().len(), 1);
        assert_eq!(queue.purge_finished(), 0);
    }

    #[test]
    fn test_lists_are_copies_in_creation_order() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());
        queue.submit(make_job("first").with_priority(JobPriority::Low)).unwrap();
        queue.submit(make_job("second")).unwrap();

        let mut all = queue.list_all();
        assert_eq!(
            all.iter().map(|j| j.job_id.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );

        all[0].status = JobStatus::Failed;
        assert_eq!(queue.get_status("first").unwrap().status, JobStatus::Pending);
        assert_eq!(queue.list_pending().len(), 2);
        assert!(queue.list_running().is_empty());
    }

    #[test]
    fn test_corrupt_job_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "garbage").unwrap();

        let queue = JobQueue::new(settings(&dir), ok_executor());
        assert_eq!(queue.stats().total, 0);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("jobs.json.corrupt.")));
    }

    #[test]
    fn test_persist_failure_keeps_memory_authoritative() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let mut s = settings(&dir);
        s.persist_file = blocker.join("jobs.json");
        let queue = JobQueue::new(s, ok_executor());

        queue.submit(make_job("mem")).unwrap();

        assert_eq!(queue.get_status("mem").unwrap().status, JobStatus::Pending);
        assert!(matches!(queue.flush(), Err(QueueError::Persist(_))));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(settings(&dir), ok_executor());

        queue.stop().await;
        assert!(!queue.is_running());

        queue.start().await;
        queue.start().await;
        assert!(queue.is_running());

        queue.stop().await;
        queue.stop().await;
        assert!(!queue.is_running());
    }
}
