use std::sync::Arc;

use tracing::{debug, warn};

use super::{KvBackend, Mutation, StoreError};

/// String key-value store scoped to one application.
///
/// Every key is stored in the backend as `@{app_id}:{key}`. Keys outside
/// that prefix are invisible to `get_all_keys` and untouched by `clear`.
/// Clone is cheap - the backend is shared.
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

/// Whether `app_id` can name a namespace. A `:` would let one namespace's
/// prefix match keys of another (`@a:` is a prefix of `@a:b:key`).
pub fn is_valid_app_id(app_id: &str) -> bool {
    !app_id.trim().is_empty() && !app_id.contains(':')
}

impl KeyValueStore {
    pub fn new(app_id: &str, backend: Arc<dyn KvBackend>) -> Result<Self, StoreError> {
        if !is_valid_app_id(app_id) {
            return Err(StoreError::InvalidNamespace(app_id.to_string()));
        }
        Ok(Self {
            backend,
            prefix: format!("@{}:", app_id),
        })
    }

    /// The backend key for `key`.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn log_failure(&self, op: &str, key: &str, error: &StoreError) {
        warn!(op = op, key = key, error = %error, "Storage operation failed");
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let storage_key = self.storage_key(key);
        let value = self.backend.get(&storage_key).await.inspect_err(|e| {
            self.log_failure("get", &storage_key, e);
        })?;
        debug!(key = %storage_key, found = value.is_some(), "Value retrieved");
        Ok(value)
    }

    /// Store `value` under `key` and hand it back.
    pub async fn set(&self, key: &str, value: &str) -> Result<String, StoreError> {
        let storage_key = self.storage_key(key);
        self.backend
            .set(&storage_key, value)
            .await
            .inspect_err(|e| self.log_failure("set", &storage_key, e))?;
        debug!(key = %storage_key, len = value.len(), "Value stored");
        Ok(value.to_string())
    }

    pub async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let storage_key = self.storage_key(key);
        self.backend
            .contains(&storage_key)
            .await
            .inspect_err(|e| self.log_failure("contains", &storage_key, e))
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let storage_key = self.storage_key(key);
        self.backend
            .remove(&storage_key)
            .await
            .inspect_err(|e| self.log_failure("remove", &storage_key, e))
    }

    /// Apply a batch atomically. Keys in `batch` are un-prefixed.
    pub async fn apply(&self, batch: Vec<Mutation>) -> Result<(), StoreError> {
        let batch: Vec<Mutation> = batch
            .into_iter()
            .map(|m| match m {
                Mutation::Set { key, value } => Mutation::set(self.storage_key(&key), value),
                Mutation::Remove { key } => Mutation::remove(self.storage_key(&key)),
            })
            .collect();
        let count = batch.len();
        self.backend
            .apply(batch)
            .await
            .inspect_err(|e| self.log_failure("apply", &self.prefix, e))?;
        debug!(prefix = %self.prefix, mutations = count, "Batch applied");
        Ok(())
    }

    /// Keys in this namespace, without the prefix, in ascending order.
    pub async fn get_all_keys(&self) -> Result<Vec<String>, StoreError> {
        let keys = self
            .backend
            .keys_with_prefix(&self.prefix)
            .await
            .inspect_err(|e| self.log_failure("keys", &self.prefix, e))?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// Remove every key in this namespace.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let keys = self.get_all_keys().await?;
        let removed = keys.len();
        self.apply(keys.into_iter().map(Mutation::remove).collect())
            .await?;
        debug!(prefix = %self.prefix, removed = removed, "Namespace cleared");
        Ok(())
    }
}
