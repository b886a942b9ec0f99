//! Image sync: manifest download, asset caching, and display records.
//!
//! - `Manifest`: ordered identifier to filename mapping served at `/images/dict`
//! - `ImageRepository`: typed records over the namespaced store
//! - `SyncManager`: fetch-once-then-reuse sync flow and the read path
//! - `DisplayRecord`: data URI plus display name, rebuilt on every read

pub mod display;
pub mod manager;
pub mod manifest;
pub mod repository;

pub use display::{image_subtype, DisplayRecord};
pub use manager::{SyncManager, SyncOutcome, SyncStatus};
pub use manifest::{Manifest, ManifestEntry};
pub use repository::{ImageRepository, SyncState};
