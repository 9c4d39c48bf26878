//! Engine - the workflow kernel facade.
//!
//! `ProcessEngine` owns the subsystems (definitions, instance manager, event
//! bus, async job executor) and wires them together. All wiring happens
//! through `ProcessEngineBuilder` at startup: definitions, listeners, the
//! storage collaborator, and the job handler are explicit constructor-time
//! registrations, never ambient state.

use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bus::{EngineEventListener, EventBus, ListenerRegistry};
use crate::events::EventType;
use crate::store::{InstanceStore, MemoryStore};
use crate::types::{Config, HistoryConfig, InstanceId, Page, PageRequest, Result, UserId};
use crate::validation::{validate_non_empty, validate_positive};

pub mod definitions;
pub mod executor;
pub mod idgen;
pub mod instances;
pub mod types;

pub use definitions::{ProcessDefinition, ProcessDefinitionRegistry};
pub use executor::{
    AsyncJobExecutor, ExecutorStats, JobCompletionSink, JobHandler, NoopJobHandler,
};
pub use idgen::IdGenerator;
pub use instances::InstanceManager;
pub use types::{
    HistoricProcessInstance, InstanceStatus, Job, JobKind, JobState, ProcessInstance,
    StartInstance,
};

// Re-exported for listener payload types used alongside the engine.
pub use crate::types::JobId;

/// Builder assembling a `ProcessEngine` from explicit registrations.
pub struct ProcessEngineBuilder {
    config: Config,
    definitions: ProcessDefinitionRegistry,
    listeners: ListenerRegistry,
    store: Option<Arc<dyn InstanceStore>>,
    job_handler: Arc<dyn JobHandler>,
    ids: IdGenerator,
}

impl ProcessEngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            definitions: ProcessDefinitionRegistry::new(),
            listeners: ListenerRegistry::new(),
            store: None,
            job_handler: Arc::new(NoopJobHandler),
            ids: IdGenerator::new(),
        }
    }

    /// Register a startable process definition.
    pub fn register_definition(mut self, definition: ProcessDefinition) -> Self {
        self.definitions.register(definition);
        self
    }

    /// Register a lifecycle event listener (ordered per event type).
    pub fn register_listener(
        mut self,
        event_type: EventType,
        listener: Arc<dyn EngineEventListener>,
    ) -> Self {
        self.listeners.register(event_type, listener);
        self
    }

    /// Use a storage collaborator other than the in-memory default.
    pub fn with_store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the work executed for each job (defaults to a no-op handler).
    pub fn with_job_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.job_handler = handler;
        self
    }

    /// Build the engine, freezing the listener registry.
    pub fn build(self) -> Result<ProcessEngine> {
        let pool_size = u32::try_from(self.config.executor.worker_pool_size).unwrap_or(0);
        validate_positive(pool_size, "executor.worker_pool_size")?;
        validate_positive(self.config.executor.max_job_attempts, "executor.max_job_attempts")?;
        validate_positive(self.config.history.max_page_size, "history.max_page_size")?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let bus = Arc::new(EventBus::new(self.listeners));

        let manager = Arc::new(InstanceManager::new(
            self.definitions,
            store,
            Arc::clone(&bus),
            self.ids,
            self.config.history.max_page_size,
        ));

        let executor = Arc::new(AsyncJobExecutor::new(
            self.config.executor.clone(),
            self.job_handler,
            Arc::clone(&manager) as Arc<dyn JobCompletionSink>,
            Arc::clone(&bus),
        ));

        Ok(ProcessEngine {
            history: self.config.history,
            drain_timeout: self.config.executor.drain_timeout,
            manager,
            executor,
            bus,
            ids: self.ids,
            executor_handle: Mutex::new(None),
        })
    }
}

impl fmt::Debug for ProcessEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessEngineBuilder")
            .field("config", &self.config)
            .field("definitions", &self.definitions.count())
            .finish_non_exhaustive()
    }
}

/// The workflow kernel: starts process instances, runs their deferred work,
/// and answers historic queries.
#[derive(Debug)]
pub struct ProcessEngine {
    history: HistoryConfig,
    drain_timeout: std::time::Duration,
    manager: Arc<InstanceManager>,
    executor: Arc<AsyncJobExecutor>,
    bus: Arc<EventBus>,
    ids: IdGenerator,
    executor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessEngine {
    pub fn builder(config: Config) -> ProcessEngineBuilder {
        ProcessEngineBuilder::new(config)
    }

    /// Start the background job executor. Idempotent.
    pub async fn start(&self) {
        let mut handle = self.executor_handle.lock().await;
        if handle.is_some() {
            tracing::warn!("engine already started");
            return;
        }
        *handle = Some(self.executor.start());
        tracing::info!("dragonflow engine started");
    }

    /// Stop the executor, draining in-flight jobs up to the configured
    /// drain timeout.
    pub async fn shutdown(&self) {
        let handle = self.executor_handle.lock().await.take();
        match handle {
            Some(handle) => self.executor.shutdown(handle).await,
            None => tracing::debug!("shutdown with no running executor"),
        }
        tracing::info!("dragonflow engine stopped");
    }

    // ── Instance operations ──

    pub async fn start_process_instance_by_key(
        &self,
        key: &str,
        start: StartInstance,
    ) -> Result<ProcessInstance> {
        self.manager.start_process_instance_by_key(key, start).await
    }

    pub async fn get_process_instance(
        &self,
        id: &InstanceId,
    ) -> Result<Option<ProcessInstance>> {
        self.manager.get_process_instance(id).await
    }

    pub async fn get_my_process_instances(
        &self,
        owner: &UserId,
        page: PageRequest,
    ) -> Result<Page<HistoricProcessInstance>> {
        self.manager.get_my_process_instances(owner, page).await
    }

    /// Terminate a running instance: its jobs are cancelled (PENDING) or
    /// drained (RUNNING) first, so no active job references the instance
    /// once it is TERMINATED.
    pub async fn terminate_process_instance(
        &self,
        id: &InstanceId,
        reason: &str,
    ) -> Result<()> {
        validate_non_empty(reason, "termination reason")?;

        let cancelled = self.executor.cancel_for_instance(id).await;
        if !cancelled.is_empty() {
            self.executor.drain_instance_jobs(id, self.drain_timeout).await?;
        }
        self.manager.terminate(id, reason).await
    }

    // ── Job operations ──

    /// Schedule deferred work for a live instance.
    pub async fn schedule_job(&self, job: Job) -> Result<()> {
        self.manager.require_running(&job.instance_id).await?;
        self.executor.schedule(job).await
    }

    /// A timer job for `instance_id`, due after `delay`.
    pub fn timer_job(&self, instance_id: InstanceId, delay: chrono::Duration) -> Job {
        Job::timer(self.ids.next_job_id(), instance_id, delay)
    }

    /// An async continuation for `instance_id`, due immediately.
    pub fn continuation_job(&self, instance_id: InstanceId) -> Job {
        Job::continuation(self.ids.next_job_id(), instance_id)
    }

    /// Jobs still PENDING or RUNNING for one instance.
    pub async fn active_jobs_for_instance(&self, instance_id: &InstanceId) -> usize {
        self.executor.active_jobs_for_instance(instance_id).await
    }

    // ── Introspection ──

    pub async fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats().await
    }

    pub async fn bus_stats(&self) -> crate::bus::BusStats {
        self.bus.stats().await
    }

    pub fn id_generator(&self) -> &IdGenerator {
        &self.ids
    }

    /// Upper bound applied to requested history page sizes.
    pub fn max_page_size(&self) -> u32 {
        self.history.max_page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DefinitionKey, Error, ExecutorConfig};

    fn definition(key: &str) -> ProcessDefinition {
        ProcessDefinition::new(
            DefinitionKey::from_string(key.to_string()).unwrap(),
            key,
        )
    }

    fn owner(name: &str) -> UserId {
        UserId::from_string(name.to_string()).unwrap()
    }

    fn engine() -> ProcessEngine {
        ProcessEngine::builder(Config::default())
            .register_definition(definition("leave_request"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn build_rejects_zero_worker_pool() {
        let config = Config {
            executor: ExecutorConfig {
                worker_pool_size: 0,
                ..ExecutorConfig::default()
            },
            ..Config::default()
        };

        let result = ProcessEngine::builder(config).build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn schedule_job_requires_live_instance() {
        let engine = engine();

        // Unknown instance
        let job = engine.continuation_job(InstanceId::new());
        assert!(matches!(
            engine.schedule_job(job).await,
            Err(Error::NotFound(_))
        ));

        // Terminated instance
        let instance = engine
            .start_process_instance_by_key(
                "leave_request",
                StartInstance::for_owner(owner("user1")),
            )
            .await
            .unwrap();
        engine
            .terminate_process_instance(&instance.id, "changed my mind")
            .await
            .unwrap();

        let job = engine.continuation_job(instance.id);
        assert!(matches!(
            engine.schedule_job(job).await,
            Err(Error::StateTransition(_))
        ));
    }

    #[tokio::test]
    async fn terminate_requires_reason() {
        let engine = engine();
        let instance = engine
            .start_process_instance_by_key(
                "leave_request",
                StartInstance::for_owner(owner("user1")),
            )
            .await
            .unwrap();

        assert!(matches!(
            engine.terminate_process_instance(&instance.id, "").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_is_safe_twice() {
        let engine = engine();
        engine.start().await;
        engine.start().await; // warns, no second loop
        engine.shutdown().await;
        engine.shutdown().await; // no-op
    }
}
