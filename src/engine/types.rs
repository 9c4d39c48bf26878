//! Engine types: instance state machine, instance records, jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{DefinitionKey, InstanceId, JobId, UserId};

/// Process instance lifecycle status.
///
/// ```text
/// RUNNING → {COMPLETED | TERMINATED}
/// ```
///
/// Both end states are terminal; a finalized instance is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Completed,
    Terminated,
}

impl InstanceStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Terminated)
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: InstanceStatus) -> bool {
        match (self, to) {
            (InstanceStatus::Running, InstanceStatus::Completed) => true,
            (InstanceStatus::Running, InstanceStatus::Terminated) => true,
            _ => false,
        }
    }
}

/// One running execution of a process definition.
///
/// Created by `InstanceManager::start_process_instance_by_key`; mutated only
/// by the manager (under the instance's write lock) in response to job
/// completion or explicit termination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInstance {
    pub id: InstanceId,
    pub definition_key: DefinitionKey,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,

    pub owner: UserId,

    /// Start variables, carried through to the historic snapshot.
    pub variables: HashMap<String, serde_json::Value>,

    pub status: InstanceStatus,

    /// Number of jobs this instance has completed so far.
    pub completed_jobs: u32,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

impl ProcessInstance {
    pub fn new(id: InstanceId, definition_key: DefinitionKey, start: StartInstance) -> Self {
        Self {
            id,
            definition_key,
            business_key: start.business_key,
            owner: start.owner,
            variables: start.variables,
            status: InstanceStatus::Running,
            completed_jobs: 0,
            started_at: Utc::now(),
            ended_at: None,
            termination_reason: None,
        }
    }

    /// Record one completed (non-final) job.
    pub fn record_job_completion(&mut self) {
        self.completed_jobs += 1;
    }

    /// Transition to COMPLETED (normal end).
    pub fn complete(&mut self) {
        self.status = InstanceStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Transition to TERMINATED (explicit cancel).
    pub fn terminate(&mut self, reason: impl Into<String>) {
        self.status = InstanceStatus::Terminated;
        self.ended_at = Some(Utc::now());
        self.termination_reason = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immutable record of a finished process instance, retained for audit/query.
///
/// Snapshot taken at finalization time; append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricProcessInstance {
    pub instance_id: InstanceId,
    pub definition_key: DefinitionKey,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,

    pub owner: UserId,
    pub variables: HashMap<String, serde_json::Value>,

    /// End status: COMPLETED or TERMINATED.
    pub status: InstanceStatus,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl HistoricProcessInstance {
    /// Derive the historic snapshot from a finalized instance.
    pub fn from_finalized(instance: &ProcessInstance) -> crate::types::Result<Self> {
        let ended_at = match (instance.status.is_terminal(), instance.ended_at) {
            (true, Some(ended_at)) => ended_at,
            _ => {
                return Err(crate::types::Error::state_transition(format!(
                    "cannot archive instance {}: status is {:?}",
                    instance.id, instance.status
                )))
            }
        };

        Ok(Self {
            instance_id: instance.id,
            definition_key: instance.definition_key.clone(),
            business_key: instance.business_key.clone(),
            owner: instance.owner.clone(),
            variables: instance.variables.clone(),
            status: instance.status,
            started_at: instance.started_at,
            ended_at,
            duration_ms: (ended_at - instance.started_at).num_milliseconds(),
        })
    }
}

/// Parameters for starting a process instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInstance {
    pub owner: UserId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,

    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl StartInstance {
    pub fn for_owner(owner: UserId) -> Self {
        Self {
            owner,
            business_key: None,
            variables: HashMap::new(),
        }
    }

    pub fn with_business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Kind of deferred work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Time-deferred work: eligible once the due time elapses.
    Timer,
    /// Async continuation: eligible immediately.
    AsyncContinuation,
}

/// Job execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobState {
    /// PENDING and RUNNING jobs still reference a live instance.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }
}

/// A unit of deferred or asynchronous work tied to a process instance.
///
/// Owned exclusively by the `AsyncJobExecutor` once scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub instance_id: InstanceId,
    pub kind: JobKind,

    /// Timestamp after which this pending job becomes eligible for execution.
    pub due_at: DateTime<Utc>,

    pub payload: serde_json::Value,

    /// When true, successful completion finalizes the owning instance.
    pub final_step: bool,

    /// Number of execution attempts so far.
    pub attempts: u32,

    pub state: JobState,
    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(id: JobId, instance_id: InstanceId, kind: JobKind, due_at: DateTime<Utc>) -> Self {
        Self {
            id,
            instance_id,
            kind,
            due_at,
            payload: serde_json::Value::Null,
            final_step: false,
            attempts: 0,
            state: JobState::Pending,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    /// A timer job due after `delay`.
    pub fn timer(id: JobId, instance_id: InstanceId, delay: chrono::Duration) -> Self {
        Self::new(id, instance_id, JobKind::Timer, Utc::now() + delay)
    }

    /// An async continuation, due immediately.
    pub fn continuation(id: JobId, instance_id: InstanceId) -> Self {
        Self::new(id, instance_id, JobKind::AsyncContinuation, Utc::now())
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Mark this job as the instance's final step.
    pub fn finalizing(mut self) -> Self {
        self.final_step = true;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_params() -> StartInstance {
        StartInstance::for_owner(UserId::from_string("user1".to_string()).unwrap())
    }

    fn definition_key() -> DefinitionKey {
        DefinitionKey::from_string("leave_request".to_string()).unwrap()
    }

    #[test]
    fn status_transitions() {
        assert!(InstanceStatus::Running.can_transition_to(InstanceStatus::Completed));
        assert!(InstanceStatus::Running.can_transition_to(InstanceStatus::Terminated));

        assert!(!InstanceStatus::Completed.can_transition_to(InstanceStatus::Running));
        assert!(!InstanceStatus::Completed.can_transition_to(InstanceStatus::Terminated));
        assert!(!InstanceStatus::Terminated.can_transition_to(InstanceStatus::Completed));
    }

    #[test]
    fn new_instance_is_running() {
        let instance = ProcessInstance::new(InstanceId::new(), definition_key(), start_params());
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.ended_at.is_none());
        assert_eq!(instance.completed_jobs, 0);
    }

    #[test]
    fn complete_sets_end_timestamp() {
        let mut instance =
            ProcessInstance::new(InstanceId::new(), definition_key(), start_params());
        instance.complete();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.ended_at.is_some());
        assert!(instance.is_terminal());
    }

    #[test]
    fn terminate_records_reason() {
        let mut instance =
            ProcessInstance::new(InstanceId::new(), definition_key(), start_params());
        instance.terminate("requester withdrew");
        assert_eq!(instance.status, InstanceStatus::Terminated);
        assert_eq!(
            instance.termination_reason.as_deref(),
            Some("requester withdrew")
        );
    }

    #[test]
    fn historic_snapshot_requires_finalized_instance() {
        let mut instance =
            ProcessInstance::new(InstanceId::new(), definition_key(), start_params());

        assert!(HistoricProcessInstance::from_finalized(&instance).is_err());

        instance.complete();
        let historic = HistoricProcessInstance::from_finalized(&instance).unwrap();
        assert_eq!(historic.instance_id, instance.id);
        assert_eq!(historic.status, InstanceStatus::Completed);
        assert!(historic.duration_ms >= 0);
    }

    #[test]
    fn continuation_job_is_immediately_due() {
        let job = Job::continuation(JobId::new(), InstanceId::new());
        assert!(job.is_due(Utc::now()));
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn timer_job_is_due_after_delay() {
        let job = Job::timer(JobId::new(), InstanceId::new(), chrono::Duration::hours(1));
        assert!(!job.is_due(Utc::now()));
        assert!(job.is_due(Utc::now() + chrono::Duration::hours(2)));
    }

    #[test]
    fn job_state_activity() {
        assert!(JobState::Pending.is_active());
        assert!(JobState::Running.is_active());
        assert!(!JobState::Done.is_active());
        assert!(!JobState::Failed.is_active());
    }
}
