//! Image server client module.
//!
//! The image server exposes two endpoints:
//! - `GET /images/dict`: JSON object mapping asset identifier to filename
//! - `GET /images/{filename}`: raw image payload
//!
//! `ImageServer` is the seam the sync flow depends on; `HttpImageServer`
//! is the reqwest-backed implementation.

pub mod client;
pub mod error;

pub use client::{HttpImageServer, ImageServer};
pub use error::ApiError;
