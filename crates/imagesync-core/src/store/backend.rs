use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::StoreError;

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { key: String, value: String },
    Remove { key: String },
}

impl Mutation {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Mutation::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Mutation::Remove { key: key.into() }
    }

    fn apply_to(self, entries: &mut BTreeMap<String, String>) {
        match self {
            Mutation::Set { key, value } => {
                entries.insert(key, value);
            }
            Mutation::Remove { key } => {
                entries.remove(&key);
            }
        }
    }
}

/// Raw string key-value storage. Keys arrive already namespaced.
///
/// `apply` must be all-or-nothing: either every mutation in the batch is
/// visible afterwards or none is.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), StoreError>;

    /// All keys currently stored, in ascending order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = self.keys().await?;
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.apply(vec![Mutation::set(key, value)]).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(vec![Mutation::remove(key)]).await
    }
}

/// In-memory backend. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        for mutation in batch {
            mutation.apply_to(&mut entries);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
