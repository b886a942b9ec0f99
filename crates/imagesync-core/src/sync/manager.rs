//! Sync orchestration.
//!
//! `SyncManager::ensure_synced` downloads the manifest and every image it
//! lists unless a previous run already completed; `load_display_records`
//! rebuilds renderable records from the store alone.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::ImageServer;
use crate::error::SyncError;

use super::repository::RESERVED_KEYS;
use super::{DisplayRecord, ImageRepository, Manifest, SyncState};

/// Default number of image downloads in flight at once.
/// One keeps memory flat and matches a strictly sequential sync.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Result of a successful `ensure_synced` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The store already held a complete sync; nothing was fetched.
    AlreadySynced,
    /// A full sync ran and stored this many assets.
    Synced { assets: usize },
}

/// Snapshot of what the store holds.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Number of entries in the stored manifest, if any.
    pub manifest_entries: Option<usize>,
    /// Manifest entries whose payload is in the store.
    pub stored_assets: usize,
    /// Stored payloads the manifest no longer lists.
    pub orphaned_assets: usize,
}

pub struct SyncManager<S> {
    server: S,
    repo: ImageRepository,
    concurrency: usize,
    // Serializes syncs so concurrent callers don't fetch everything twice
    sync_lock: Mutex<()>,
}

impl<S: ImageServer> SyncManager<S> {
    pub fn new(server: S, repo: ImageRepository) -> Self {
        Self {
            server,
            repo,
            concurrency: DEFAULT_CONCURRENCY,
            sync_lock: Mutex::new(()),
        }
    }

    /// Allow up to `concurrency` image downloads in flight. Values below
    /// one are treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn repository(&self) -> &ImageRepository {
        &self.repo
    }

    /// Make sure the manifest and every asset are in the store.
    ///
    /// Returns without touching the network when a previous sync completed.
    /// Any failure aborts the sync and is returned; assets stored before the
    /// failure stay in the store but the sync is not marked complete, so the
    /// next call starts over.
    pub async fn ensure_synced(&self) -> Result<SyncOutcome, SyncError> {
        let _guard = self.sync_lock.lock().await;

        let state = self.repo.sync_state().await?;
        debug!(
            manifest_stored = state.manifest_stored,
            all_stored = state.all_stored,
            "Checked sync state"
        );
        if state.is_complete() {
            return Ok(SyncOutcome::AlreadySynced);
        }

        match self.run_sync().await {
            Ok(assets) => {
                info!(assets = assets, "Sync complete");
                Ok(SyncOutcome::Synced { assets })
            }
            Err(e) => {
                error!(error = %e, "Sync failed");
                Err(e)
            }
        }
    }

    async fn run_sync(&self) -> Result<usize, SyncError> {
        let manifest = self.server.fetch_manifest().await?;
        if let Some(entry) = manifest
            .iter()
            .find(|e| RESERVED_KEYS.contains(&e.id.as_str()))
        {
            return Err(SyncError::ReservedIdentifier(entry.id.clone()));
        }

        self.repo.begin_sync(&manifest).await?;
        info!(entries = manifest.len(), "Manifest stored");

        let stored = self.store_assets(&manifest).await?;
        self.repo.mark_all_stored(Utc::now()).await?;
        Ok(stored)
    }

    /// Fetch every asset with at most `concurrency` requests in flight and
    /// store them in manifest order. Stops at the first failure.
    async fn store_assets(&self, manifest: &Manifest) -> Result<usize, SyncError> {
        let server = &self.server;
        let mut fetches = stream::iter(manifest.iter())
            .map(|entry| async move {
                let bytes = server.fetch_asset(&entry.filename).await.inspect_err(|e| {
                    warn!(id = %entry.id, filename = %entry.filename, error = %e, "Image fetch failed");
                })?;
                Ok::<_, SyncError>((entry, bytes))
            })
            .buffered(self.concurrency);

        let mut stored = 0;
        while let Some(fetched) = fetches.next().await {
            let (entry, bytes) = fetched?;
            self.repo.set_asset(&entry.id, &bytes).await?;
            stored += 1;
            debug!(id = %entry.id, filename = %entry.filename, stored = stored, total = manifest.len(), "Image stored");
        }
        Ok(stored)
    }

    /// Rebuild display records from the store, in manifest order.
    ///
    /// Entries whose payload is not in the store (an interrupted sync) are
    /// skipped.
    pub async fn load_display_records(&self) -> Result<Vec<DisplayRecord>, SyncError> {
        let manifest = self
            .repo
            .get_manifest()
            .await?
            .ok_or(SyncError::MissingManifest)?;

        let mut records = Vec::with_capacity(manifest.len());
        for entry in &manifest {
            let Some(encoded) = self.repo.get_asset(&entry.id).await? else {
                warn!(id = %entry.id, filename = %entry.filename, "Image not in store, skipping");
                continue;
            };
            records.push(DisplayRecord::from_asset(&entry.filename, &encoded)?);
        }
        Ok(records)
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let state = self.repo.sync_state().await?;
        let manifest = self.repo.get_manifest().await?;

        let mut stored_assets = 0;
        if let Some(manifest) = &manifest {
            for entry in manifest.iter() {
                if self.repo.has_asset(&entry.id).await? {
                    stored_assets += 1;
                }
            }
        }
        let orphaned_assets = self
            .repo
            .asset_keys()
            .await?
            .iter()
            .filter(|id| manifest.as_ref().map_or(true, |m| m.get(id.as_str()).is_none()))
            .count();

        Ok(SyncStatus {
            state,
            manifest_entries: manifest.as_ref().map(Manifest::len),
            stored_assets,
            orphaned_assets,
        })
    }

    /// Drop everything this application stored so the next
    /// `ensure_synced` runs a full sync.
    pub async fn reset(&self) -> Result<(), SyncError> {
        let _guard = self.sync_lock.lock().await;
        self.repo.reset().await?;
        info!("Image store reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;

    use super::*;
    use crate::api::ApiError;
    use crate::store::{KeyValueStore, KvBackend, MemoryBackend, Mutation, StoreError};

    /// In-process image server that counts requests.
    #[derive(Default)]
    struct FakeServer {
        manifest: StdMutex<Option<String>>,
        images: HashMap<String, Vec<u8>>,
        failing: StdMutex<HashSet<String>>,
        manifest_calls: AtomicUsize,
        asset_calls: AtomicUsize,
    }

    impl FakeServer {
        fn new(manifest: &str, images: &[(&str, &[u8])]) -> Self {
            Self {
                manifest: StdMutex::new(Some(manifest.to_string())),
                images: images
                    .iter()
                    .map(|(name, bytes)| (name.to_string(), bytes.to_vec()))
                    .collect(),
                ..Default::default()
            }
        }

        fn unreachable() -> Self {
            Self::default()
        }

        fn fail_on(&self, filename: &str) {
            self.failing.lock().unwrap().insert(filename.to_string());
        }

        fn recover(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn calls(&self) -> (usize, usize) {
            (
                self.manifest_calls.load(Ordering::SeqCst),
                self.asset_calls.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl ImageServer for FakeServer {
        async fn fetch_manifest(&self) -> Result<Manifest, ApiError> {
            self.manifest_calls.fetch_add(1, Ordering::SeqCst);
            let body = self.manifest.lock().unwrap().clone();
            match body {
                Some(json) => Ok(Manifest::from_json(&json)?),
                None => Err(ApiError::ServerError("connection refused".into())),
            }
        }

        async fn fetch_asset(&self, filename: &str) -> Result<Vec<u8>, ApiError> {
            self.asset_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.failing.lock().unwrap().contains(filename) {
                return Err(ApiError::ServerError(format!("{} unavailable", filename)));
            }
            self.images
                .get(filename)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(filename.to_string()))
        }
    }

    /// Backend whose writes always fail.
    struct ReadOnlyBackend;

    #[async_trait]
    impl KvBackend for ReadOnlyBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn apply(&self, _batch: Vec<Mutation>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }

        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn repo() -> ImageRepository {
        ImageRepository::new(KeyValueStore::new("gallery", Arc::new(MemoryBackend::new())).unwrap())
    }

    fn three_images() -> FakeServer {
        FakeServer::new(
            r#"{"one":"1.png","two":"2.png","three":"3.png"}"#,
            &[("1.png", b"one"), ("2.png", b"two"), ("3.png", b"three")],
        )
    }

    #[tokio::test]
    async fn test_end_to_end_fresh_store() {
        let server = FakeServer::new(r#"{"x":"img.png"}"#, &[("img.png", b"pixels")]);
        let manager = SyncManager::new(server, repo());

        let outcome = manager.ensure_synced().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { assets: 1 });

        let store = manager.repository().store();
        assert!(store.get("dictStored").await.unwrap().is_some());
        assert_eq!(store.get("allStored").await.unwrap().as_deref(), Some("true"));
        assert_eq!(manager.repository().asset_keys().await.unwrap(), vec!["x"]);

        let records = manager.load_display_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "img.png");
        assert_eq!(records[0].uri, "data:image/png;base64,cGl4ZWxz");
    }

    #[tokio::test]
    async fn test_second_sync_makes_no_network_calls() {
        let manager = SyncManager::new(three_images(), repo());

        manager.ensure_synced().await.unwrap();
        let after_first = manager.server.calls();
        assert_eq!(after_first, (1, 3));

        let outcome = manager.ensure_synced().await.unwrap();
        assert_eq!(outcome, SyncOutcome::AlreadySynced);
        assert_eq!(manager.server.calls(), after_first);
    }

    #[tokio::test]
    async fn test_records_from_stored_data() {
        let repo = repo();
        repo.store()
            .set("dictStored", r#"{"a":"cat.png","b":"dog.jpg"}"#)
            .await
            .unwrap();
        repo.store().set("a", "Zm9v").await.unwrap();

        let manager = SyncManager::new(FakeServer::unreachable(), repo);
        let records = manager.load_display_records().await.unwrap();

        assert_eq!(
            records[0],
            DisplayRecord {
                uri: "data:image/png;base64,Zm9v".to_string(),
                name: "cat.png".to_string(),
            }
        );
        // "b" has no payload yet
        assert_eq!(records.len(), 1);
        assert_eq!(manager.server.calls(), (0, 0));
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_complete() {
        let manager = SyncManager::new(three_images(), repo());
        manager.server.fail_on("2.png");

        let err = manager.ensure_synced().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(ApiError::ServerError(_))));
        assert!(err.is_retryable());

        let repo = manager.repository();
        let state = repo.sync_state().await.unwrap();
        assert!(state.manifest_stored);
        assert!(!state.all_stored);
        // The first image stays behind, the third was never reached
        assert_eq!(repo.asset_keys().await.unwrap(), vec!["one"]);
        assert_eq!(manager.server.calls(), (1, 2));

        manager.server.recover();
        let outcome = manager.ensure_synced().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { assets: 3 });
        assert_eq!(manager.server.calls(), (2, 5));
        assert!(repo.sync_state().await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_unreachable_server_stores_nothing() {
        let manager = SyncManager::new(FakeServer::unreachable(), repo());

        let err = manager.ensure_synced().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(manager.repository().store().get_all_keys().await.unwrap().is_empty());
        assert!(matches!(
            manager.load_display_records().await,
            Err(SyncError::MissingManifest)
        ));
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_parse_error() {
        let server = FakeServer::new(r#"{"a": 1}"#, &[]);
        let manager = SyncManager::new(server, repo());

        let err = manager.ensure_synced().await.unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
        assert!(!manager.repository().sync_state().await.unwrap().manifest_stored);
    }

    #[tokio::test]
    async fn test_reserved_identifier_rejected() {
        let server = FakeServer::new(r#"{"allStored":"a.png"}"#, &[("a.png", b"a")]);
        let manager = SyncManager::new(server, repo());

        let err = manager.ensure_synced().await.unwrap_err();
        assert!(matches!(err, SyncError::ReservedIdentifier(ref id) if id == "allStored"));
        assert_eq!(manager.server.calls(), (1, 0));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let repo = ImageRepository::new(KeyValueStore::new("gallery", Arc::new(ReadOnlyBackend)).unwrap());
        let manager = SyncManager::new(three_images(), repo);

        let err = manager.ensure_synced().await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(StoreError::Unavailable(_))));
        assert_eq!(manager.server.calls(), (1, 0));
    }

    #[tokio::test]
    async fn test_stale_manifest_flag_forces_full_resync() {
        let repo = repo();
        // Left behind by an interrupted sync: manifest present, assets incomplete
        repo.store().set("dictStored", r#"{"old":"old.png"}"#).await.unwrap();
        repo.store().set("old", "b2xk").await.unwrap();

        let manager = SyncManager::new(three_images(), repo);
        let outcome = manager.ensure_synced().await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced { assets: 3 });
        let records = manager.load_display_records().await.unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["1.png", "2.png", "3.png"]);
    }

    #[tokio::test]
    async fn test_malformed_filename_on_read() {
        let server = FakeServer::new(r#"{"n":"noext"}"#, &[("noext", b"raw")]);
        let manager = SyncManager::new(server, repo());

        manager.ensure_synced().await.unwrap();
        match manager.load_display_records().await {
            Err(SyncError::MalformedFilename(name)) => assert_eq!(name, "noext"),
            other => panic!("expected MalformedFilename, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_fetch_keeps_manifest_order() {
        let manager = SyncManager::new(three_images(), repo()).with_concurrency(3);

        let outcome = manager.ensure_synced().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { assets: 3 });

        let records = manager.load_display_records().await.unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["1.png", "2.png", "3.png"]);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_failure_aborts() {
        let manager = SyncManager::new(three_images(), repo()).with_concurrency(2);
        manager.server.fail_on("1.png");

        assert!(manager.ensure_synced().await.is_err());
        let repo = manager.repository();
        assert!(!repo.sync_state().await.unwrap().all_stored);
        assert!(repo.asset_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simultaneous_callers_sync_once() {
        let manager = SyncManager::new(three_images(), repo());

        let (first, second) = tokio::join!(manager.ensure_synced(), manager.ensure_synced());
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, SyncOutcome::AlreadySynced));

        assert_eq!(
            outcomes,
            vec![SyncOutcome::Synced { assets: 3 }, SyncOutcome::AlreadySynced]
        );
        assert_eq!(manager.server.calls(), (1, 3));
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let manager = SyncManager::new(three_images(), repo());

        let before = manager.status().await.unwrap();
        assert_eq!(before.manifest_entries, None);
        assert_eq!(before.state.age_display(), "never");

        manager.ensure_synced().await.unwrap();
        let after = manager.status().await.unwrap();
        assert!(after.state.is_complete());
        assert_eq!(after.manifest_entries, Some(3));
        assert_eq!(after.stored_assets, 3);
        assert_eq!(after.orphaned_assets, 0);
        assert_eq!(after.state.age_display(), "just now");

        manager.reset().await.unwrap();
        assert!(!manager.status().await.unwrap().state.manifest_stored);

        manager.ensure_synced().await.unwrap();
        assert_eq!(manager.server.calls(), (2, 6));
    }

    #[tokio::test]
    async fn test_status_ignores_orphaned_assets() {
        let manager = SyncManager::new(three_images(), repo());
        manager.ensure_synced().await.unwrap();

        let repo = manager.repository();
        repo.set_asset("gone", b"old").await.unwrap();
        repo.store().remove("two").await.unwrap();

        let status = manager.status().await.unwrap();
        assert_eq!(status.manifest_entries, Some(3));
        assert_eq!(status.stored_assets, 2);
        assert_eq!(status.orphaned_assets, 1);
    }
}
