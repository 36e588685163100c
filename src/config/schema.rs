//! Configuration schema for Rock
//!
//! Global configuration lives at `~/.config/rock/config.toml`; a project may
//! carry a `rock.toml` at its root that overrides it key by key.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Native fingerprint inputs
    pub fingerprint: FingerprintConfig,

    /// Local build cache settings
    pub cache: CacheConfig,

    /// Remote build cache provider
    pub remote_cache: RemoteCacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Fingerprint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Additional files, directories or glob patterns to hash
    pub extra_sources: Vec<String>,

    /// Gitignore-style patterns excluded from hashing
    pub ignore_paths: Vec<String>,

    /// Environment variables whose values are part of the fingerprint
    pub env: Vec<String>,

    /// Honour `.gitignore` files inside hashed directories
    pub respect_gitignore: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            extra_sources: vec![],
            ignore_paths: vec![],
            env: vec![],
            respect_gitignore: true,
        }
    }
}

/// Local build cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (defaults to the platform cache dir, `ROCK_CACHE_DIR` wins)
    pub root: Option<PathBuf>,

    /// Number of sources hashed concurrently
    pub hash_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            hash_concurrency: 16,
        }
    }
}

/// Which remote provider backs the build cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote caching disabled
    #[default]
    None,
    /// GitHub Actions artifacts
    Github,
    /// S3-compatible object storage
    S3,
}

/// Remote cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCacheConfig {
    /// Selected provider
    pub provider: ProviderKind,

    /// GitHub settings
    pub github: GithubConfig,

    /// S3 settings
    pub s3: S3Config,
}

/// GitHub Actions artifacts settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Repository owner (user or organisation)
    pub owner: Option<String>,

    /// Repository name
    pub repository: Option<String>,

    /// Personal access token (falls back to `GITHUB_TOKEN`, then `gh auth token`)
    pub token: Option<String>,

    /// REST API base URL (change for GitHub Enterprise)
    pub api_url: String,

    /// GitHub host passed to `gh` when discovering a token
    pub host: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: None,
            repository: None,
            token: None,
            api_url: "https://api.github.com".to_string(),
            host: "github.com".to_string(),
        }
    }
}

/// S3-compatible storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Bucket name
    pub bucket: Option<String>,

    /// Signing region
    pub region: String,

    /// Custom endpoint (R2, MinIO, ...). Defaults to AWS.
    pub endpoint: Option<String>,

    /// Key prefix under which artifacts are stored
    pub directory: String,

    /// Use `<endpoint>/<bucket>/<key>` instead of virtual-hosted URLs
    pub force_path_style: bool,

    /// Access key (falls back to `AWS_ACCESS_KEY_ID`)
    pub access_key_id: Option<String>,

    /// Secret key (falls back to `AWS_SECRET_ACCESS_KEY`)
    pub secret_access_key: Option<String>,

    /// Session token (falls back to `AWS_SESSION_TOKEN`)
    pub session_token: Option<String>,

    /// Lifetime of presigned URLs
    pub presign_expiry_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            directory: "rock-artifacts".to_string(),
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            presign_expiry_secs: 3600,
        }
    }
}
