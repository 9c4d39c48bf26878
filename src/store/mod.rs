//! Persistence seam for instances and history.
//!
//! The engine operates exclusively through [`InstanceStore`], enabling
//! pluggable backends. The contract is deliberately small: get-by-id and put
//! for live instances, append plus owner-paged query for the historic log.

use async_trait::async_trait;

use crate::engine::{HistoricProcessInstance, ProcessInstance};
use crate::types::{InstanceId, Result, UserId};

mod memory;

pub use memory::MemoryStore;

/// Storage collaborator for process instances and historic records.
///
/// Errors from the store propagate upward and are never retried by the
/// kernel; retry-with-backoff is reserved for job execution.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    // ── Live instances ──

    /// Insert or overwrite an instance record.
    async fn put_instance(&self, instance: &ProcessInstance) -> Result<()>;

    async fn get_instance(&self, id: &InstanceId) -> Result<Option<ProcessInstance>>;

    // ── History (append-only) ──

    /// Append an immutable historic snapshot.
    async fn append_history(&self, record: &HistoricProcessInstance) -> Result<()>;

    /// Page through one owner's history, most-recent-first.
    ///
    /// Returns `(total_matching, items)` where `items` is the slice
    /// `[offset, offset + limit)` of the stably ordered result.
    async fn history_by_owner(
        &self,
        owner: &UserId,
        offset: u64,
        limit: u64,
    ) -> Result<(u64, Vec<HistoricProcessInstance>)>;
}
