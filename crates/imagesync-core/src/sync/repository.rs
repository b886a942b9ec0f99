//! Typed access to the records a sync leaves in the store.
//!
//! Store layout, all keys under the application namespace:
//! - `dictStored`: manifest JSON; its presence means the manifest is stored
//! - `allStored`: `"true"` once every asset has been stored
//! - `syncedAt`: RFC 3339 time the last complete sync finished
//! - `{id}`: base64 payload of the asset with manifest identifier `id`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::SyncError;
use crate::store::{KeyValueStore, Mutation, StoreError};

use super::Manifest;

const MANIFEST_KEY: &str = "dictStored";
const ALL_STORED_KEY: &str = "allStored";
const SYNCED_AT_KEY: &str = "syncedAt";
const FLAG_TRUE: &str = "true";

/// Keys the repository uses for its own bookkeeping.
pub const RESERVED_KEYS: [&str; 3] = [MANIFEST_KEY, ALL_STORED_KEY, SYNCED_AT_KEY];

/// Completion markers read from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub manifest_stored: bool,
    pub all_stored: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Both the manifest and every asset are in the store.
    pub fn is_complete(&self) -> bool {
        self.manifest_stored && self.all_stored
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.synced_at.map(|at| (Utc::now() - at).num_minutes())
    }

    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Typed repository over the application's key-value namespace.
#[derive(Clone)]
pub struct ImageRepository {
    store: KeyValueStore,
}

impl ImageRepository {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }

    pub async fn get_manifest(&self) -> Result<Option<Manifest>, SyncError> {
        match self.store.get(MANIFEST_KEY).await? {
            Some(json) => Ok(Some(Manifest::from_json(&json)?)),
            None => Ok(None),
        }
    }

    /// Store a freshly fetched manifest and drop the completion markers of
    /// any earlier sync, in one batch.
    pub async fn begin_sync(&self, manifest: &Manifest) -> Result<(), SyncError> {
        let json = manifest.to_json()?;
        self.store
            .apply(vec![
                Mutation::set(MANIFEST_KEY, json),
                Mutation::remove(ALL_STORED_KEY),
                Mutation::remove(SYNCED_AT_KEY),
            ])
            .await?;
        Ok(())
    }

    /// Base64 payload stored for `id`.
    pub async fn get_asset(&self, id: &str) -> Result<Option<String>, StoreError> {
        self.store.get(id).await
    }

    pub async fn has_asset(&self, id: &str) -> Result<bool, StoreError> {
        self.store.contains(id).await
    }

    /// Encode and store the raw bytes of one asset.
    pub async fn set_asset(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let encoded = STANDARD.encode(bytes);
        self.store.set(id, &encoded).await?;
        Ok(())
    }

    pub async fn sync_state(&self) -> Result<SyncState, StoreError> {
        let manifest_stored = self.store.get(MANIFEST_KEY).await?.is_some();
        let all_stored = self.store.get(ALL_STORED_KEY).await?.as_deref() == Some(FLAG_TRUE);
        let synced_at = self
            .store
            .get(SYNCED_AT_KEY)
            .await?
            .and_then(|raw| match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    debug!(value = %raw, error = %e, "Ignoring unreadable sync timestamp");
                    None
                }
            });

        Ok(SyncState {
            manifest_stored,
            all_stored,
            synced_at,
        })
    }

    /// Record that every asset of the stored manifest is present.
    pub async fn mark_all_stored(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store
            .apply(vec![
                Mutation::set(ALL_STORED_KEY, FLAG_TRUE),
                Mutation::set(SYNCED_AT_KEY, at.to_rfc3339()),
            ])
            .await
    }

    /// Keys holding asset payloads.
    pub async fn asset_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|k| !RESERVED_KEYS.contains(&k.as_str()))
            .collect())
    }

    /// Remove the manifest, every asset and the completion markers.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.clear().await
    }
}
