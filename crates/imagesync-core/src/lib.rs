//! Core library for imagesync.
//!
//! Downloads a manifest of named images from an image server, caches the
//! manifest and every image payload in a namespaced key-value store, and
//! rebuilds displayable records from the cache.
//!
//! - [`api`]: image server client (`ImageServer`, `HttpImageServer`)
//! - [`store`]: namespaced key-value store and its backends
//! - [`sync`]: typed repository, manifest, display records, `SyncManager`
//! - [`config`]: application configuration

pub mod api;
pub mod config;
pub mod error;
pub mod store;
pub mod sync;

pub use api::{ApiError, HttpImageServer, ImageServer};
pub use config::Config;
pub use error::SyncError;
pub use store::{KeyValueStore, KvBackend, MemoryBackend, SledBackend, StoreError};
pub use sync::{
    DisplayRecord, ImageRepository, Manifest, SyncManager, SyncOutcome, SyncState, SyncStatus,
};
