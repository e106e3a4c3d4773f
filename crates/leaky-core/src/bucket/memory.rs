use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::store::AtomicStore;
use super::types::{Applied, BucketRecord, Created, Guard, Mutation};

/// In-process store for tests and single-process deployments.
///
/// Clones share the same records, so several handles built from clones of one
/// `MemoryStore` behave like independent clients of a shared database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, BucketRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct bucket records held.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AtomicStore for MemoryStore {
    async fn create_unique_if_absent(&self, record: BucketRecord) -> anyhow::Result<Created> {
        let mut map = self.records.lock().await;
        if map.contains_key(&record.name) {
            return Ok(Created::AlreadyExists);
        }
        map.insert(record.name.clone(), record);
        Ok(Created::Inserted)
    }

    async fn conditional_update(
        &self,
        name: &str,
        guard: Guard,
        mutation: Mutation,
    ) -> anyhow::Result<Option<Applied>> {
        let mut map = self.records.lock().await;
        let Some(record) = map.get_mut(name) else {
            return Ok(None);
        };
        if !guard.matches(record) {
            return Ok(None);
        }
        let removed = mutation.apply(record);
        Ok(Some(Applied {
            record: record.clone(),
            removed,
        }))
    }

    async fn load(&self, name: &str) -> anyhow::Result<Option<BucketRecord>> {
        Ok(self.records.lock().await.get(name).cloned())
    }
}
