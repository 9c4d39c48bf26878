//! Engine lifecycle events.
//!
//! Events form a closed set: each variant carries its payload and maps to one
//! [`EventType`] key under which listeners register. Event-type names follow
//! the engine convention of upper-snake identifiers (`TASK_CREATED`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::{Job, ProcessInstance};

/// Lifecycle event type key used for listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ProcessStarted,
    TaskCreated,
    ProcessCompleted,
    ProcessCancelled,
    JobRetriesExhausted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ProcessStarted => "PROCESS_STARTED",
            EventType::TaskCreated => "TASK_CREATED",
            EventType::ProcessCompleted => "PROCESS_COMPLETED",
            EventType::ProcessCancelled => "PROCESS_CANCELLED",
            EventType::JobRetriesExhausted => "JOB_RETRIES_EXHAUSTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event published on the engine bus.
///
/// Closed enum: listeners receive the full typed payload and dispatch on the
/// variant, no payload re-parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// A process instance entered RUNNING.
    ProcessStarted { instance: ProcessInstance },

    /// The initial task of a freshly started instance was created.
    TaskCreated { instance: ProcessInstance },

    /// A process instance reached its normal end.
    ProcessCompleted { instance: ProcessInstance },

    /// A process instance was explicitly terminated.
    ProcessCancelled {
        instance: ProcessInstance,
        reason: String,
    },

    /// A job failed terminally after exhausting its retry attempts.
    JobRetriesExhausted { job: Job },
}

impl EngineEvent {
    /// The registration key this event dispatches under.
    pub fn event_type(&self) -> EventType {
        match self {
            EngineEvent::ProcessStarted { .. } => EventType::ProcessStarted,
            EngineEvent::TaskCreated { .. } => EventType::TaskCreated,
            EngineEvent::ProcessCompleted { .. } => EventType::ProcessCompleted,
            EngineEvent::ProcessCancelled { .. } => EventType::ProcessCancelled,
            EngineEvent::JobRetriesExhausted { .. } => EventType::JobRetriesExhausted,
        }
    }
}
