//! Engine identifier generation.
//!
//! One generator instance is handed to the engine at construction time (the
//! id-generation strategy is an explicit wiring slot, not ambient state).

use uuid::Uuid;

use crate::types::{InstanceId, JobId};

/// Mints globally unique identifiers for instances and jobs.
///
/// Thread-safe without external locking: concurrent `next` calls never
/// return the same value.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// A fresh UUID, unique across all calls.
    pub fn next(&self) -> Uuid {
        Uuid::new_v4()
    }

    pub fn next_instance_id(&self) -> InstanceId {
        InstanceId::from_uuid(self.next())
    }

    pub fn next_job_id(&self) -> JobId {
        JobId::from_uuid(self.next())
    }
}
