//! Process instance management.
//!
//! The manager owns process-instance records: it starts instances, advances
//! them on job completion, finalizes them (COMPLETED or TERMINATED), and
//! serves historic queries. All mutation of one instance is serialized
//! through that instance's lock; distinct instances never contend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::bus::EventBus;
use crate::engine::definitions::ProcessDefinitionRegistry;
use crate::engine::executor::JobCompletionSink;
use crate::engine::idgen::IdGenerator;
use crate::engine::types::{HistoricProcessInstance, Job, ProcessInstance, StartInstance};
use crate::events::EngineEvent;
use crate::store::InstanceStore;
use crate::types::{Error, InstanceId, Page, PageRequest, Result, UserId};
use crate::validation::validate_non_empty;

/// Owns process-instance records and their lifecycle.
pub struct InstanceManager {
    definitions: ProcessDefinitionRegistry,
    store: Arc<dyn InstanceStore>,
    bus: Arc<EventBus>,
    ids: IdGenerator,
    max_page_size: u32,
    /// Per-instance write locks (single-writer-per-instance discipline).
    locks: RwLock<HashMap<InstanceId, Arc<Mutex<()>>>>,
}

impl InstanceManager {
    pub fn new(
        definitions: ProcessDefinitionRegistry,
        store: Arc<dyn InstanceStore>,
        bus: Arc<EventBus>,
        ids: IdGenerator,
        max_page_size: u32,
    ) -> Self {
        Self {
            definitions,
            store,
            bus,
            ids,
            max_page_size,
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Start a process instance of the given definition.
    ///
    /// Publishes `PROCESS_STARTED` and `TASK_CREATED` synchronously before
    /// returning. Listener failures are reported by the bus but never roll
    /// back instance creation.
    pub async fn start_process_instance_by_key(
        &self,
        key: &str,
        start: StartInstance,
    ) -> Result<ProcessInstance> {
        validate_non_empty(key, "definition key")?;
        let definition = self.definitions.require(key)?;

        let instance = ProcessInstance::new(self.ids.next_instance_id(), definition.key.clone(), start);
        self.store.put_instance(&instance).await?;

        tracing::info!(
            "started process instance {} (definition {}, owner {})",
            instance.id,
            instance.definition_key,
            instance.owner
        );

        self.publish_non_fatal(&EngineEvent::ProcessStarted {
            instance: instance.clone(),
        })
        .await;
        self.publish_non_fatal(&EngineEvent::TaskCreated {
            instance: instance.clone(),
        })
        .await;

        Ok(instance)
    }

    pub async fn get_process_instance(&self, id: &InstanceId) -> Result<Option<ProcessInstance>> {
        self.store.get_instance(id).await
    }

    /// Page through one owner's historic instances, most-recent-first.
    ///
    /// Paging parameters are clamped; an out-of-range page yields an empty
    /// page with the correct total.
    pub async fn get_my_process_instances(
        &self,
        owner: &UserId,
        page: PageRequest,
    ) -> Result<Page<HistoricProcessInstance>> {
        let page = page.normalized(self.max_page_size);
        let (total, items) = self
            .store
            .history_by_owner(owner, page.offset(), u64::from(page.size))
            .await?;
        Ok(Page::new(total, page, items))
    }

    /// Fail if `id` does not reference a live (RUNNING) instance.
    pub(crate) async fn require_running(&self, id: &InstanceId) -> Result<()> {
        let instance = self
            .store
            .get_instance(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("unknown process instance: {}", id)))?;
        if instance.is_terminal() {
            return Err(Error::state_transition(format!(
                "process instance {} is {:?}",
                id, instance.status
            )));
        }
        Ok(())
    }

    /// Advance or finalize the referenced instance after a job completed.
    ///
    /// A `final_step` job finalizes the instance to COMPLETED and archives
    /// it; any other job records an advancement. Completions that arrive
    /// after the instance reached a terminal status are ignored.
    pub(crate) async fn job_completed(&self, job: &Job) -> Result<()> {
        let lock = self.instance_lock(&job.instance_id).await;
        let _guard = lock.lock().await;

        let Some(mut instance) = self.store.get_instance(&job.instance_id).await? else {
            return Err(Error::not_found(format!(
                "job {} references unknown instance {}",
                job.id, job.instance_id
            )));
        };

        if instance.is_terminal() {
            tracing::debug!(
                "ignoring completion of job {} for finalized instance {}",
                job.id,
                job.instance_id
            );
            return Ok(());
        }

        if job.final_step {
            instance.complete();
            let record = HistoricProcessInstance::from_finalized(&instance)?;
            self.store.put_instance(&instance).await?;
            self.store.append_history(&record).await?;
            drop(_guard);
            self.forget_lock(&instance.id).await;

            tracing::info!("process instance {} completed", instance.id);
            self.publish_non_fatal(&EngineEvent::ProcessCompleted { instance })
                .await;
        } else {
            instance.record_job_completion();
            self.store.put_instance(&instance).await?;
            tracing::debug!(
                "instance {} advanced ({} job(s) completed)",
                instance.id,
                instance.completed_jobs
            );
        }

        Ok(())
    }

    /// Finalize an instance to TERMINATED.
    ///
    /// The engine facade cancels/drains the instance's jobs before calling
    /// this. Terminating an already-terminal instance is a no-op.
    pub(crate) async fn terminate(&self, id: &InstanceId, reason: &str) -> Result<()> {
        let lock = self.instance_lock(id).await;
        let _guard = lock.lock().await;

        let Some(mut instance) = self.store.get_instance(id).await? else {
            return Err(Error::not_found(format!("unknown process instance: {}", id)));
        };

        if instance.is_terminal() {
            return Ok(()); // Already finalized
        }

        instance.terminate(reason);
        let record = HistoricProcessInstance::from_finalized(&instance)?;
        self.store.put_instance(&instance).await?;
        self.store.append_history(&record).await?;
        drop(_guard);
        self.forget_lock(id).await;

        tracing::info!("process instance {} terminated: {}", id, reason);
        self.publish_non_fatal(&EngineEvent::ProcessCancelled {
            instance,
            reason: reason.to_string(),
        })
        .await;

        Ok(())
    }

    /// Publish, reporting listener failures without failing the operation.
    async fn publish_non_fatal(&self, event: &EngineEvent) {
        if let Err(err) = self.bus.publish(event).await {
            tracing::warn!("listener failures on {}: {}", event.event_type(), err);
        }
    }

    async fn instance_lock(&self, id: &InstanceId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(id) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().await;
        Arc::clone(locks.entry(*id).or_default())
    }

    /// Drop the lock entry of a finalized instance (terminal instances are
    /// immutable, so the lock is never needed again).
    async fn forget_lock(&self, id: &InstanceId) {
        self.locks.write().await.remove(id);
    }
}

#[async_trait]
impl JobCompletionSink for InstanceManager {
    async fn on_job_completed(&self, job: &Job) -> Result<()> {
        self.job_completed(job).await
    }
}

impl fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceManager")
            .field("definitions", &self.definitions)
            .field("max_page_size", &self.max_page_size)
            .finish_non_exhaustive()
    }
}
