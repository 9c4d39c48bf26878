//! Core types for the dragonflow kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (InstanceId, JobId, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for engine, executor, and history
//! - **Paging**: Page request/response containers for historic queries

mod config;
mod errors;
mod ids;
mod paging;

pub use config::{Config, ExecutorConfig, HistoryConfig, ObservabilityConfig};
pub use errors::{Error, ListenerFailure, ListenerFailures, Result};
pub use ids::{DefinitionKey, InstanceId, JobId, UserId};
pub use paging::{Page, PageRequest};
