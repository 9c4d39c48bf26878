//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use std::fmt;
use thiserror::Error;

use super::ids::JobId;
use crate::events::EventType;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the dragonflow kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (malformed start parameters, bad config values).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (instance, job).
    #[error("not found: {0}")]
    NotFound(String),

    /// Start requested for an unregistered process definition key.
    #[error("unknown process definition: {0}")]
    UnknownDefinition(String),

    /// Invalid state transition (e.g. mutating a terminal instance).
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// One or more listeners failed during a publish. Non-fatal: every
    /// handler ran before this aggregate was assembled.
    #[error("listener failure: {0}")]
    ListenerFailure(ListenerFailures),

    /// A single job execution attempt failed (retried by the executor).
    #[error("job execution failed: {0}")]
    JobExecution(String),

    /// A job exhausted its retry attempts and is terminally failed.
    #[error("job {job_id} exhausted after {attempts} attempts: {message}")]
    JobExhausted {
        job_id: JobId,
        attempts: u32,
        message: String,
    },

    /// Storage collaborator errors. Fatal for the operation; never retried
    /// by the kernel.
    #[error("storage error: {0}")]
    Storage(String),

    /// Timeout (shutdown drain, job-drain on terminate).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single failed listener invocation within one publish.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub event_type: EventType,
    /// Registration-order position of the failed listener.
    pub index: usize,
    pub listener: String,
    pub message: String,
}

/// Aggregate of listener failures for one published event.
///
/// `publish` collects one entry per failed handler and reports them together
/// after every handler has run.
#[derive(Debug, Clone, Default)]
pub struct ListenerFailures {
    pub failures: Vec<ListenerFailure>,
}

impl ListenerFailures {
    pub fn push(&mut self, failure: ListenerFailure) {
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for ListenerFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} listener(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                "; [{}#{} {}] {}",
                failure.event_type, failure.index, failure.listener, failure.message
            )?;
        }
        Ok(())
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unknown_definition(key: impl Into<String>) -> Self {
        Self::UnknownDefinition(key.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn job_execution(msg: impl Into<String>) -> Self {
        Self::JobExecution(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}
