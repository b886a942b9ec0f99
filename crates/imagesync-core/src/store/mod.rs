//! Namespaced key-value storage.
//!
//! `KeyValueStore` prefixes every key with `@{app_id}:` before it reaches a
//! `KvBackend`, so several applications can share one backend without
//! colliding. Two backends are provided:
//! - `MemoryBackend`: process-local map, for tests and throwaway runs
//! - `SledBackend`: on-disk sled database with atomic batches

pub mod backend;
pub mod disk;
pub mod error;
pub mod namespace;

pub use backend::{KvBackend, MemoryBackend, Mutation};
pub use disk::SledBackend;
pub use error::StoreError;
pub use namespace::{is_valid_app_id, KeyValueStore};
