//! In-memory reference implementation of [`InstanceStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::InstanceStore;
use crate::engine::{HistoricProcessInstance, ProcessInstance};
use crate::types::{InstanceId, Result, UserId};

/// Map-backed store. Suitable for tests and single-process deployments;
/// production backends implement [`InstanceStore`] against real storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: RwLock<HashMap<InstanceId, ProcessInstance>>,
    history: RwLock<Vec<HistoricProcessInstance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live instance records (any status).
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Number of archived historic records.
    pub async fn history_count(&self) -> usize {
        self.history.read().await.len()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn put_instance(&self, instance: &ProcessInstance) -> Result<()> {
        self.instances
            .write()
            .await
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Option<ProcessInstance>> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn append_history(&self, record: &HistoricProcessInstance) -> Result<()> {
        self.history.write().await.push(record.clone());
        Ok(())
    }

    async fn history_by_owner(
        &self,
        owner: &UserId,
        offset: u64,
        limit: u64,
    ) -> Result<(u64, Vec<HistoricProcessInstance>)> {
        let history = self.history.read().await;

        let mut matching: Vec<&HistoricProcessInstance> =
            history.iter().filter(|r| &r.owner == owner).collect();

        // Most-recent-first; instance id breaks ties for a stable order.
        matching.sort_by(|a, b| {
            b.ended_at
                .cmp(&a.ended_at)
                .then_with(|| b.started_at.cmp(&a.started_at))
                .then_with(|| b.instance_id.cmp(&a.instance_id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok((total, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StartInstance;
    use crate::types::DefinitionKey;
    use chrono::{Duration, Utc};

    fn owner(name: &str) -> UserId {
        UserId::from_string(name.to_string()).unwrap()
    }

    fn running_instance(user: &str) -> ProcessInstance {
        ProcessInstance::new(
            InstanceId::new(),
            DefinitionKey::from_string("leave_request".to_string()).unwrap(),
            StartInstance::for_owner(owner(user)),
        )
    }

    fn archived(user: &str, minutes_ago: i64) -> HistoricProcessInstance {
        let mut instance = running_instance(user);
        instance.complete();
        let mut record = HistoricProcessInstance::from_finalized(&instance).unwrap();
        record.ended_at = Utc::now() - Duration::minutes(minutes_ago);
        record
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryStore::new();
        let instance = running_instance("user1");

        store.put_instance(&instance).await.unwrap();
        let loaded = store.get_instance(&instance.id).await.unwrap().unwrap();
        assert_eq!(loaded, instance);
        assert_eq!(store.instance_count().await, 1);
        assert_eq!(store.history_count().await, 0);
    }

    #[tokio::test]
    async fn get_missing_instance_returns_none() {
        let store = MemoryStore::new();
        assert!(store
            .get_instance(&InstanceId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn history_query_is_most_recent_first() {
        let store = MemoryStore::new();
        store.append_history(&archived("user1", 30)).await.unwrap();
        store.append_history(&archived("user1", 10)).await.unwrap();
        store.append_history(&archived("user1", 20)).await.unwrap();

        let (total, items) = store.history_by_owner(&owner("user1"), 0, 10).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 3);
        assert!(items[0].ended_at > items[1].ended_at);
        assert!(items[1].ended_at > items[2].ended_at);
    }

    #[tokio::test]
    async fn history_query_filters_by_owner() {
        let store = MemoryStore::new();
        store.append_history(&archived("user1", 10)).await.unwrap();
        store.append_history(&archived("user2", 5)).await.unwrap();

        let (total, items) = store.history_by_owner(&owner("user1"), 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].owner, owner("user1"));
    }

    #[tokio::test]
    async fn history_query_pages_with_offset_and_limit() {
        let store = MemoryStore::new();
        for minutes in 0..5 {
            store
                .append_history(&archived("user1", minutes * 10))
                .await
                .unwrap();
        }

        let (total, first) = store.history_by_owner(&owner("user1"), 0, 2).await.unwrap();
        let (_, second) = store.history_by_owner(&owner("user1"), 2, 2).await.unwrap();
        let (_, tail) = store.history_by_owner(&owner("user1"), 4, 2).await.unwrap();

        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(tail.len(), 1);

        // Offset past the end yields an empty slice, not an error.
        let (total, items) = store
            .history_by_owner(&owner("user1"), 100, 2)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert!(items.is_empty());
    }
}
