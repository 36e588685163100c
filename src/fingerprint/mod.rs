//! Native fingerprinting
//!
//! A fingerprint is a SHA-256 digest over everything that can change the
//! output of a native build: the platform project directory, autolinked
//! native modules, patches, config files, user-provided extra sources and
//! selected environment variables. Same inputs, same hash, on every machine.
//!
//! # Digest layout
//!
//! | Source | Digest |
//! |--------|--------|
//! | `file` | SHA-256 of the file bytes |
//! | `dir` | SHA-256 of `path \0 digest \n` for every file, sorted by path |
//! | `contents` | SHA-256 of the UTF-8 string |
//! | symlink | SHA-256 of `symlink:` + link target |
//! | final | SHA-256 of `type \0 id \0 digest \n` for every source, sorted |

pub mod enumerate;
pub mod hasher;
pub mod source;
pub mod walk;

pub use enumerate::collect_sources;
pub use hasher::{EnvSnapshot, FingerprintEngine};
pub use source::{Fingerprint, HashSource};
pub use walk::{IgnoreRules, WalkOptions};

use crate::config::schema::{CacheConfig, FingerprintConfig};
use crate::error::RockResult;
use crate::platform::{Platform, COMMON_IGNORE_PATHS};
use std::path::Path;
use tracing::info;

/// Inputs that shape a fingerprint beyond the project tree itself
#[derive(Debug, Clone)]
pub struct FingerprintOptions {
    /// Additional files, directories or globs to hash
    pub extra_sources: Vec<String>,
    /// Gitignore-style patterns excluded from hashing
    pub ignore_paths: Vec<String>,
    /// Environment variable names whose values are hashed
    pub env: Vec<String>,
    /// Honour `.gitignore` files
    pub respect_gitignore: bool,
    /// Sources hashed concurrently
    pub concurrency: usize,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            extra_sources: vec![],
            ignore_paths: vec![],
            env: vec![],
            respect_gitignore: true,
            concurrency: 16,
        }
    }
}

impl FingerprintOptions {
    /// Build options from the `[fingerprint]` and `[cache]` config sections
    pub fn from_config(fingerprint: &FingerprintConfig, cache: &CacheConfig) -> Self {
        Self {
            extra_sources: fingerprint.extra_sources.clone(),
            ignore_paths: fingerprint.ignore_paths.clone(),
            env: fingerprint.env.clone(),
            respect_gitignore: fingerprint.respect_gitignore,
            concurrency: cache.hash_concurrency,
        }
    }

    /// Built-in ignore patterns for `platform` followed by the user's own
    pub fn ignore_patterns(&self, platform: Option<Platform>) -> Vec<String> {
        let builtin = platform.map(|p| p.default_ignore_paths()).unwrap_or(&[]);
        COMMON_IGNORE_PATHS
            .iter()
            .chain(builtin)
            .map(|p| p.to_string())
            .chain(self.ignore_paths.iter().cloned())
            .collect()
    }
}

/// Fingerprint a project for `platform`, reading `options.env` from the
/// process environment once.
pub async fn native_fingerprint(
    root: &Path,
    platform: Option<Platform>,
    options: &FingerprintOptions,
) -> RockResult<Fingerprint> {
    let env = EnvSnapshot::capture(&options.env);
    fingerprint_with_env(root, platform, options, &env).await
}

/// Fingerprint a project with an explicit environment snapshot
pub async fn fingerprint_with_env(
    root: &Path,
    platform: Option<Platform>,
    options: &FingerprintOptions,
    env: &EnvSnapshot,
) -> RockResult<Fingerprint> {
    let engine = FingerprintEngine::new(root)?;
    let rules = IgnoreRules::new(engine.root(), &options.ignore_patterns(platform))?;
    let engine = engine
        .with_ignore_rules(rules)
        .with_walk_options(WalkOptions {
            respect_gitignore: options.respect_gitignore,
        })
        .with_concurrency(options.concurrency);

    let sources = collect_sources(engine.root(), platform, options).await;
    let fingerprint = engine.compute(sources, env).await;
    info!(
        "Computed {} fingerprint {}",
        platform.map(|p| p.as_str()).unwrap_or("bare"),
        fingerprint.hash
    );
    Ok(fingerprint)
}
