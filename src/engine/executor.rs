//! Async job executor.
//!
//! Decouples long-running or time-deferred workflow steps from the
//! synchronous request path:
//!   - `schedule` inserts a PENDING job keyed by due time and returns
//!     immediately
//!   - a background poll loop (default 1000 ms) moves due jobs to RUNNING and
//!     dispatches them to a semaphore-bounded worker pool; due jobs beyond
//!     free capacity stay PENDING until a worker frees up
//!   - failures retry with exponential backoff up to a configured attempt
//!     limit, then fail terminally and surface one JOB_RETRIES_EXHAUSTED
//!     event on the bus
//!   - shutdown stops the poll loop, waits for in-flight jobs up to a drain
//!     timeout, then forcibly fails the stragglers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::engine::types::{Job, JobState};
use crate::events::EngineEvent;
use crate::types::{Error, ExecutorConfig, InstanceId, JobId, Result};

/// Work attached to a job. The executor retries the whole execution on
/// failure, so handlers should be idempotent per attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

/// Handler for jobs that carry no work of their own (pure timers and
/// continuations whose only effect is advancing the instance).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJobHandler;

#[async_trait]
impl JobHandler for NoopJobHandler {
    async fn execute(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}

/// Receives successfully executed jobs so the instance side can advance or
/// finalize the referenced process instance.
#[async_trait]
pub trait JobCompletionSink: Send + Sync {
    async fn on_job_completed(&self, job: &Job) -> Result<()>;
}

/// Counters over the executor's lifetime.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub scheduled: u64,
    pub completed: u64,
    pub retried: u64,
    /// Terminal failures (retries exhausted or forced at shutdown).
    pub failed: u64,
    /// Jobs cancelled before or during execution.
    pub cancelled: u64,
}

/// Outcome of recording a failed attempt.
enum FailOutcome {
    Retried { attempts: u32, due_at: DateTime<Utc> },
    Exhausted(Box<Job>),
    /// The job was cancelled while running; its failure is moot.
    Discarded,
}

#[derive(Debug, Default)]
struct JobTableInner {
    jobs: HashMap<JobId, Job>,
    /// Due-time index over PENDING jobs.
    pending: BTreeMap<(DateTime<Utc>, JobId), ()>,
    /// RUNNING jobs flagged for cooperative cancellation.
    cancelling: HashSet<JobId>,
}

/// The executor's job table, the only shared mutable job state.
#[derive(Debug, Default)]
struct JobTable {
    inner: Mutex<JobTableInner>,
}

impl JobTable {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(Error::validation(format!(
                "job {} is already scheduled",
                job.id
            )));
        }
        inner.pending.insert((job.due_at, job.id), ());
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    /// Pop the earliest due PENDING job and mark it RUNNING.
    async fn take_due_one(&self, now: DateTime<Utc>) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let key = match inner.pending.keys().next() {
            Some(&(due_at, id)) if due_at <= now => (due_at, id),
            _ => return None,
        };
        inner.pending.remove(&key);

        let job = inner.jobs.get_mut(&key.1)?;
        job.state = JobState::Running;
        Some(job.clone())
    }

    /// Record a successful execution: DONE jobs leave the active set.
    ///
    /// Returns `None` if the job was cancelled while running (its completion
    /// is discarded).
    async fn complete(&self, id: &JobId) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        if inner.cancelling.remove(id) {
            inner.jobs.remove(id);
            return None;
        }
        let mut job = inner.jobs.remove(id)?;
        job.state = JobState::Done;
        Some(job)
    }

    /// Record a failed attempt: retry with backoff or fail terminally.
    async fn fail(
        &self,
        id: &JobId,
        message: &str,
        max_attempts: u32,
        backoff_base: std::time::Duration,
    ) -> FailOutcome {
        let mut inner = self.inner.lock().await;
        if inner.cancelling.remove(id) {
            inner.jobs.remove(id);
            return FailOutcome::Discarded;
        }
        let Some(job) = inner.jobs.get_mut(id) else {
            return FailOutcome::Discarded;
        };

        job.attempts += 1;
        job.last_error = Some(message.to_string());

        if job.attempts < max_attempts {
            job.state = JobState::Pending;
            job.due_at = Utc::now() + backoff_delay(backoff_base, job.attempts);
            let key = (job.due_at, job.id);
            let outcome = FailOutcome::Retried {
                attempts: job.attempts,
                due_at: job.due_at,
            };
            inner.pending.insert(key, ());
            outcome
        } else {
            let mut job = match inner.jobs.remove(id) {
                Some(job) => job,
                None => return FailOutcome::Discarded,
            };
            job.state = JobState::Failed;
            FailOutcome::Exhausted(Box::new(job))
        }
    }

    /// Cancel all of an instance's jobs: PENDING jobs are removed outright,
    /// RUNNING jobs are flagged so their outcome is discarded on finish.
    async fn cancel_for_instance(&self, instance_id: &InstanceId) -> (Vec<JobId>, Vec<JobId>) {
        let mut inner = self.inner.lock().await;

        let pending: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| &j.instance_id == instance_id && j.state == JobState::Pending)
            .map(|j| j.id)
            .collect();
        for id in &pending {
            if let Some(job) = inner.jobs.remove(id) {
                inner.pending.remove(&(job.due_at, job.id));
            }
        }

        let running: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| &j.instance_id == instance_id && j.state == JobState::Running)
            .map(|j| j.id)
            .collect();
        for id in &running {
            inner.cancelling.insert(*id);
        }

        (pending, running)
    }

    /// Jobs of this instance still PENDING or RUNNING.
    async fn active_count_for_instance(&self, instance_id: &InstanceId) -> usize {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .filter(|j| &j.instance_id == instance_id && j.state.is_active())
            .count()
    }

    /// Forcibly fail every RUNNING job (shutdown drain expired).
    async fn fail_all_running(&self) -> Vec<Job> {
        let mut inner = self.inner.lock().await;
        let running: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .map(|j| j.id)
            .collect();

        let mut failed = Vec::with_capacity(running.len());
        for id in running {
            inner.cancelling.remove(&id);
            if let Some(mut job) = inner.jobs.remove(&id) {
                job.state = JobState::Failed;
                job.last_error = Some("forcibly failed at shutdown".to_string());
                failed.push(job);
            }
        }
        failed
    }

    async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }
}

/// Exponential backoff: `base * 2^(attempts-1)`, exponent capped.
fn backoff_delay(base: std::time::Duration, attempts: u32) -> chrono::Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let millis = base.as_millis().saturating_mul(1u128 << exp);
    chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// Shared state between the executor handle and its poll loop.
struct ExecutorCore {
    config: ExecutorConfig,
    table: JobTable,
    handler: Arc<dyn JobHandler>,
    sink: Arc<dyn JobCompletionSink>,
    bus: Arc<EventBus>,
    workers: Arc<Semaphore>,
    stats: Mutex<ExecutorStats>,
}

impl ExecutorCore {
    /// One poll cycle: dispatch due jobs while worker permits are available.
    async fn dispatch_due(self: &Arc<Self>, inflight: &mut JoinSet<()>) {
        let now = Utc::now();
        loop {
            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                // Pool saturated; due jobs wait in the pending queue.
                break;
            };
            let Some(job) = self.table.take_due_one(now).await else {
                drop(permit);
                break;
            };

            let core = Arc::clone(self);
            inflight.spawn(async move {
                let _permit = permit;
                core.execute_one(job).await;
            });
        }
    }

    async fn execute_one(&self, job: Job) {
        tracing::debug!(
            "executing job {} (instance {}, attempt {})",
            job.id,
            job.instance_id,
            job.attempts + 1
        );

        match self.handler.execute(&job).await {
            Ok(()) => match self.table.complete(&job.id).await {
                Some(done) => {
                    self.stats.lock().await.completed += 1;
                    if let Err(err) = self.sink.on_job_completed(&done).await {
                        tracing::error!(
                            "completion handling failed for job {}: {}",
                            done.id,
                            err
                        );
                    }
                }
                None => {
                    self.stats.lock().await.cancelled += 1;
                    tracing::debug!("discarded completion of cancelled job {}", job.id);
                }
            },
            Err(err) => {
                let outcome = self
                    .table
                    .fail(
                        &job.id,
                        &err.to_string(),
                        self.config.max_job_attempts,
                        self.config.retry_backoff_base,
                    )
                    .await;

                match outcome {
                    FailOutcome::Retried { attempts, due_at } => {
                        self.stats.lock().await.retried += 1;
                        tracing::warn!(
                            "job {} failed (attempt {}), retrying at {}: {}",
                            job.id,
                            attempts,
                            due_at,
                            err
                        );
                    }
                    FailOutcome::Exhausted(failed) => {
                        self.stats.lock().await.failed += 1;
                        let terminal = Error::JobExhausted {
                            job_id: failed.id,
                            attempts: failed.attempts,
                            message: err.to_string(),
                        };
                        tracing::warn!("{}", terminal);
                        self.report_exhausted(*failed).await;
                    }
                    FailOutcome::Discarded => {
                        self.stats.lock().await.cancelled += 1;
                    }
                }
            }
        }
    }

    async fn report_exhausted(&self, job: Job) {
        let event = EngineEvent::JobRetriesExhausted { job };
        if let Err(err) = self.bus.publish(&event).await {
            tracing::warn!("listener failures on job-exhausted event: {}", err);
        }
    }

    async fn run_poll_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inflight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_due(&mut inflight).await;
                }
                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                _ = shutdown.cancelled() => break,
            }
        }

        // Drain phase: let in-flight jobs finish, then force-fail stragglers.
        let drain = async {
            while inflight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.drain_timeout, drain)
            .await
            .is_err()
        {
            inflight.abort_all();
            while inflight.join_next().await.is_some() {}

            let failed = self.table.fail_all_running().await;
            if !failed.is_empty() {
                tracing::warn!(
                    "drain timeout expired, forcibly failed {} running job(s)",
                    failed.len()
                );
            }
            for job in failed {
                self.stats.lock().await.failed += 1;
                self.report_exhausted(job).await;
            }
        }

        tracing::info!("job executor stopped");
    }
}

/// Worker pool that polls for due jobs and executes them with bounded
/// concurrency and retry.
pub struct AsyncJobExecutor {
    core: Arc<ExecutorCore>,
    shutdown: CancellationToken,
}

impl AsyncJobExecutor {
    pub fn new(
        config: ExecutorConfig,
        handler: Arc<dyn JobHandler>,
        sink: Arc<dyn JobCompletionSink>,
        bus: Arc<EventBus>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            core: Arc::new(ExecutorCore {
                config,
                table: JobTable::default(),
                handler,
                sink,
                bus,
                workers,
                stats: Mutex::new(ExecutorStats::default()),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Insert a PENDING job keyed by due time. Returns immediately; the job
    /// runs once its due time elapses and a worker frees up.
    pub async fn schedule(&self, job: Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::validation("executor is shutting down"));
        }
        if job.state != JobState::Pending {
            return Err(Error::validation(format!(
                "job {} must be scheduled in pending state",
                job.id
            )));
        }

        tracing::debug!(
            "scheduled job {} for instance {} due {}",
            job.id,
            job.instance_id,
            job.due_at
        );
        self.core.table.insert(job).await?;
        self.core.stats.lock().await.scheduled += 1;
        Ok(())
    }

    /// Start the background polling loop.
    pub fn start(&self) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.clone();
        tokio::spawn(core.run_poll_loop(shutdown))
    }

    /// Cancel all jobs referencing `instance_id`. PENDING jobs are removed
    /// immediately; RUNNING jobs are cancelled cooperatively (their outcomes
    /// are discarded once they finish). Returns the affected job ids.
    pub async fn cancel_for_instance(&self, instance_id: &InstanceId) -> Vec<JobId> {
        let (pending, running) = self.core.table.cancel_for_instance(instance_id).await;
        if !pending.is_empty() {
            self.core.stats.lock().await.cancelled += pending.len() as u64;
        }
        tracing::debug!(
            "cancelled {} pending and flagged {} running job(s) for instance {}",
            pending.len(),
            running.len(),
            instance_id
        );
        pending.into_iter().chain(running).collect()
    }

    /// Wait until no PENDING/RUNNING job references `instance_id`.
    pub async fn drain_instance_jobs(
        &self,
        instance_id: &InstanceId,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let wait = async {
            loop {
                if self.core.table.active_count_for_instance(instance_id).await == 0 {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            Error::timeout(format!(
                "jobs for instance {} did not drain within {:?}",
                instance_id, timeout
            ))
        })
    }

    /// Jobs of this instance still PENDING or RUNNING.
    pub async fn active_jobs_for_instance(&self, instance_id: &InstanceId) -> usize {
        self.core.table.active_count_for_instance(instance_id).await
    }

    pub async fn pending_count(&self) -> usize {
        self.core.table.pending_count().await
    }

    /// Total jobs currently tracked (any state).
    pub async fn job_count(&self) -> usize {
        self.core.table.len().await
    }

    pub async fn stats(&self) -> ExecutorStats {
        self.core.stats.lock().await.clone()
    }

    /// Stop the poll loop and wait for the drain phase to finish.
    pub async fn shutdown(&self, handle: JoinHandle<()>) {
        self.shutdown.cancel();
        if let Err(err) = handle.await {
            tracing::error!("executor loop ended abnormally: {}", err);
        }
    }
}

impl fmt::Debug for AsyncJobExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncJobExecutor")
            .field("config", &self.core.config)
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ListenerRegistry;
    use crate::engine::types::JobKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingHandler {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn execute(&self, _job: &Job) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(Error::job_execution("simulated failure"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        completed: Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl JobCompletionSink for RecordingSink {
        async fn on_job_completed(&self, job: &Job) -> Result<()> {
            self.completed.lock().await.push(job.id);
            Ok(())
        }
    }

    fn fast_config(pool: usize, max_attempts: u32) -> ExecutorConfig {
        ExecutorConfig {
            poll_interval: Duration::from_millis(10),
            worker_pool_size: pool,
            max_job_attempts: max_attempts,
            retry_backoff_base: Duration::from_millis(1),
            drain_timeout: Duration::from_millis(500),
        }
    }

    fn executor(
        config: ExecutorConfig,
        handler: Arc<dyn JobHandler>,
    ) -> (AsyncJobExecutor, Arc<RecordingSink>, Arc<EventBus>) {
        let sink = Arc::new(RecordingSink::default());
        let bus = Arc::new(EventBus::new(ListenerRegistry::new()));
        let executor = AsyncJobExecutor::new(config, handler, sink.clone(), bus.clone());
        (executor, sink, bus)
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if check().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn due_job_executes_and_leaves_table() {
        let handler = CountingHandler::new(0);
        let (executor, sink, _bus) = executor(fast_config(2, 3), handler.clone());
        let handle = executor.start();

        let job = Job::continuation(JobId::new(), InstanceId::new());
        let job_id = job.id;
        executor.schedule(job).await.unwrap();

        wait_until(|| async { executor.stats().await.completed == 1 }).await;

        assert_eq!(executor.job_count().await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*sink.completed.lock().await, vec![job_id]);
        executor.shutdown(handle).await;
    }

    #[tokio::test]
    async fn future_timer_job_waits_for_due_time() {
        let handler = CountingHandler::new(0);
        let (executor, _sink, _bus) = executor(fast_config(2, 3), handler.clone());
        let handle = executor.start();

        let job = Job::new(
            JobId::new(),
            InstanceId::new(),
            JobKind::Timer,
            Utc::now() + chrono::Duration::milliseconds(150),
        );
        executor.schedule(job).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.pending_count().await, 1);

        wait_until(|| async { executor.stats().await.completed == 1 }).await;
        executor.shutdown(handle).await;
    }

    #[tokio::test]
    async fn failing_job_retries_then_succeeds() {
        let handler = CountingHandler::new(2);
        let (executor, sink, _bus) = executor(fast_config(2, 5), handler.clone());
        let handle = executor.start();

        executor
            .schedule(Job::continuation(JobId::new(), InstanceId::new()))
            .await
            .unwrap();

        wait_until(|| async { executor.stats().await.completed == 1 }).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let stats = executor.stats().await;
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(sink.completed.lock().await.len(), 1);
        executor.shutdown(handle).await;
    }

    #[tokio::test]
    async fn exhausted_job_fails_terminally_once() {
        let handler = CountingHandler::new(u32::MAX);
        let (executor, sink, bus) = executor(fast_config(2, 3), handler.clone());
        let handle = executor.start();

        executor
            .schedule(Job::continuation(JobId::new(), InstanceId::new()))
            .await
            .unwrap();

        wait_until(|| async { executor.stats().await.failed == 1 }).await;

        // maxAttempts=3: initial attempt plus exactly two retries.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let stats = executor.stats().await;
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 1);
        assert!(sink.completed.lock().await.is_empty());
        assert_eq!(executor.job_count().await, 0);

        // One terminal failure event was published.
        assert_eq!(bus.stats().await.events_published, 1);
        executor.shutdown(handle).await;
    }

    #[tokio::test]
    async fn cancel_removes_pending_jobs() {
        let handler = CountingHandler::new(0);
        let (executor, _sink, _bus) = executor(fast_config(2, 3), handler.clone());

        let instance_id = InstanceId::new();
        for _ in 0..2 {
            let job = Job::new(
                JobId::new(),
                instance_id,
                JobKind::Timer,
                Utc::now() + chrono::Duration::hours(1),
            );
            executor.schedule(job).await.unwrap();
        }
        let other = Job::new(
            JobId::new(),
            InstanceId::new(),
            JobKind::Timer,
            Utc::now() + chrono::Duration::hours(1),
        );
        executor.schedule(other).await.unwrap();

        let cancelled = executor.cancel_for_instance(&instance_id).await;
        assert_eq!(cancelled.len(), 2);
        assert_eq!(executor.active_jobs_for_instance(&instance_id).await, 0);
        assert_eq!(executor.pending_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_schedule_is_rejected() {
        let handler = CountingHandler::new(0);
        let (executor, _sink, _bus) = executor(fast_config(2, 3), handler.clone());

        let job = Job::new(
            JobId::new(),
            InstanceId::new(),
            JobKind::Timer,
            Utc::now() + chrono::Duration::hours(1),
        );
        executor.schedule(job.clone()).await.unwrap();
        assert!(executor.schedule(job).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_jobs() {
        let handler = CountingHandler::new(0);
        let (executor, _sink, _bus) = executor(fast_config(2, 3), handler.clone());
        let handle = executor.start();

        executor.shutdown(handle).await;

        let result = executor
            .schedule(Job::continuation(JobId::new(), InstanceId::new()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1).num_milliseconds(), 100);
        assert_eq!(backoff_delay(base, 2).num_milliseconds(), 200);
        assert_eq!(backoff_delay(base, 3).num_milliseconds(), 400);
        assert_eq!(backoff_delay(base, 4).num_milliseconds(), 800);
    }
}
