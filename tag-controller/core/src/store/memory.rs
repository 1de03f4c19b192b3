use super::{Predicate, ResourceStore, StoreError, Transaction};
use crate::resource::{Conditions, ResourceTags, ResourceType};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// An in-memory [`ResourceStore`].
///
/// Transactions hold the store's lock until they are committed or dropped,
/// so writes to the same key are serialized.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

type Records = BTreeMap<Key, ResourceTags>;

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    resource_type: ResourceType,
    namespace: Option<String>,
    name: String,
}

struct MemoryTx<'s> {
    records: MutexGuard<'s, Records>,
    staged: Records,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn find_first_by(
        &self,
        conditions: &Conditions,
    ) -> Result<Option<ResourceTags>, StoreError> {
        let records = self.records.lock().await;
        if conditions.namespace.is_some() {
            return Ok(records.get(&Key::from(conditions)).cloned());
        }
        Ok(records.values().find(|r| conditions.matches(r)).cloned())
    }

    async fn find_all_by(&self, predicate: Predicate<'_>) -> Result<Vec<ResourceTags>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| predicate(r)).cloned().collect())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        let records = self.records.lock().await;
        Ok(Box::new(MemoryTx {
            records,
            staged: Records::new(),
        }))
    }
}

#[async_trait::async_trait]
impl Transaction for MemoryTx<'_> {
    async fn create(&mut self, record: &mut ResourceTags) -> Result<(), StoreError> {
        let key = Key::from(&record.conditions());
        if self.records.contains_key(&key) || self.staged.contains_key(&key) {
            return Err(StoreError::Conflict(record.conditions()));
        }

        let id = record
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        trace!(%id, %key.name, "Staged create");
        self.staged.insert(key, record.clone());
        Ok(())
    }

    async fn update(&mut self, record: &ResourceTags) -> Result<(), StoreError> {
        let conditions = record.conditions();
        let id = record
            .id
            .as_ref()
            .ok_or_else(|| StoreError::MissingId(conditions.clone()))?;
        let key = Key::from(&conditions);

        let existing = self.staged.get(&key).or_else(|| self.records.get(&key));
        match existing {
            Some(found) if found.id.as_ref() == Some(id) => {}
            _ => return Err(StoreError::NotFound(conditions)),
        }

        trace!(%id, %key.name, "Staged update");
        self.staged.insert(key, record.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        self.records.extend(staged);
        Ok(())
    }
}

impl From<&Conditions> for Key {
    fn from(c: &Conditions) -> Self {
        Self {
            resource_type: c.resource_type,
            namespace: c.namespace.clone(),
            name: c.name.clone(),
        }
    }
}
