//! Rock - native build caching for React Native
//!
//! Fingerprints everything that can change a native build and reuses
//! matching binaries from a local cache or a remote provider (GitHub
//! Actions artifacts, S3) instead of rebuilding.

pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod platform;
pub mod remote;
pub mod ui;

pub use error::{RockError, RockResult};
