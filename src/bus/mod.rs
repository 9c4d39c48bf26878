//! Event bus for engine lifecycle events.
//!
//! In-process publish/subscribe with a startup-frozen listener registry:
//!   - Listeners register per event type, in order, before the engine is built
//!   - `publish` runs every handler for the event's type in registration
//!     order, synchronously on the publishing execution context
//!   - A failing handler never prevents later handlers from running; failures
//!     are collected and reported as one aggregate, non-fatal error after all
//!     handlers have run
//!
//! There is no unsubscribe: the registry is read-only once the bus owns it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::events::{EngineEvent, EventType};
use crate::types::{Error, ListenerFailure, ListenerFailures, Result};

/// Handler invoked when a registered lifecycle event is published.
///
/// Handlers run to completion (or failure) inside `publish`; a handler that
/// needs to re-enter the engine must not do so while the publisher holds the
/// affected instance's lock.
#[async_trait]
pub trait EngineEventListener: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn on_event(&self, event: &EngineEvent) -> Result<()>;
}

/// Ordered listener lists keyed by event type, assembled at startup.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<EventType, Vec<Arc<dyn EngineEventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the ordered list for `event_type`.
    pub fn register(&mut self, event_type: EventType, listener: Arc<dyn EngineEventListener>) {
        tracing::debug!(
            "registered listener {} for {}",
            listener.name(),
            event_type
        );
        self.listeners.entry(event_type).or_default().push(listener);
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners.get(&event_type).map_or(0, Vec::len)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &debug_listener_map(&self.listeners))
            .finish()
    }
}

/// Render a listener map as event-type -> handler-name lists.
fn debug_listener_map(
    listeners: &HashMap<EventType, Vec<Arc<dyn EngineEventListener>>>,
) -> HashMap<EventType, Vec<&str>> {
    listeners
        .iter()
        .map(|(event_type, handlers)| {
            (*event_type, handlers.iter().map(|h| h.name()).collect())
        })
        .collect()
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub events_published: u64,
    pub handlers_invoked: u64,
    pub handler_failures: u64,
}

/// In-process event bus with a frozen registry.
pub struct EventBus {
    listeners: HashMap<EventType, Vec<Arc<dyn EngineEventListener>>>,
    stats: RwLock<BusStats>,
}

impl EventBus {
    /// Build the bus, freezing the registry.
    pub fn new(registry: ListenerRegistry) -> Self {
        Self {
            listeners: registry.listeners,
            stats: RwLock::new(BusStats::default()),
        }
    }

    /// Publish an event to every listener registered for its type, in
    /// registration order.
    ///
    /// Returns the number of handlers invoked, or `Error::ListenerFailure`
    /// aggregating every handler that failed. All handlers run either way;
    /// the aggregate is advisory for the publisher.
    pub async fn publish(&self, event: &EngineEvent) -> Result<usize> {
        let event_type = event.event_type();
        let handlers = self
            .listeners
            .get(&event_type)
            .map(|h| h.as_slice())
            .unwrap_or(&[]);

        let mut failures = ListenerFailures::default();
        for (index, listener) in handlers.iter().enumerate() {
            if let Err(err) = listener.on_event(event).await {
                tracing::warn!(
                    "listener {} failed for {}: {}",
                    listener.name(),
                    event_type,
                    err
                );
                failures.push(ListenerFailure {
                    event_type,
                    index,
                    listener: listener.name().to_string(),
                    message: err.to_string(),
                });
            }
        }

        let mut stats = self.stats.write().await;
        stats.events_published += 1;
        stats.handlers_invoked += handlers.len() as u64;
        stats.handler_failures += failures.len() as u64;
        drop(stats);

        tracing::debug!(
            "published {} to {} listener(s), {} failure(s)",
            event_type,
            handlers.len(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(handlers.len())
        } else {
            Err(Error::ListenerFailure(failures))
        }
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners.get(&event_type).map_or(0, Vec::len)
    }

    /// Get current bus statistics.
    pub async fn stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &debug_listener_map(&self.listeners))
            .finish_non_exhaustive()
    }
}
