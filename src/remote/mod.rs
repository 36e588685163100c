//! Remote build cache protocol
//!
//! A [`RemoteBuildCache`] is a stateless adapter over some network store of
//! packed artifacts, keyed by artifact name. The core never looks at which
//! backend it talks to: the configured provider is resolved once into a
//! trait object by [`create_remote_cache`].
//!
//! Not-found is `Ok(None)` / an empty list. Authentication failures are
//! [`RockError::RemoteAuth`] so callers can suggest a fix.

pub mod github;
pub mod s3;
pub mod sigv4;

pub use github::GithubBuildCache;
pub use s3::S3BuildCache;

use crate::config::schema::RemoteCacheConfig;
use crate::config::ProviderKind;
use crate::credentials::GithubCredentials;
use crate::error::{RockError, RockResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// User agent sent with every remote request
pub const USER_AGENT: &str = concat!("rock/", env!("CARGO_PKG_VERSION"));

/// An artifact stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteArtifact {
    pub name: String,
    /// Where the artifact can be fetched from (API or presigned URL)
    pub url: String,
    /// Backend-specific identifier, when the backend has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A download in flight. The body is streamed, never buffered whole.
pub struct RemoteDownload {
    pub artifact: RemoteArtifact,
    /// Body size when the server announced one
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

impl fmt::Debug for RemoteDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDownload")
            .field("artifact", &self.artifact)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Parameters for [`RemoteBuildCache::list`]
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Restrict to this name; `None` lists everything
    pub artifact_name: Option<String>,
    pub limit: Option<usize>,
}

impl ListRequest {
    pub fn named(artifact_name: impl Into<String>) -> Self {
        Self {
            artifact_name: Some(artifact_name.into()),
            limit: None,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// Parameters for [`RemoteBuildCache::upload`]
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub artifact_name: String,
    /// Zip produced by [`crate::cache::archive::pack_artifact`]
    pub archive_path: PathBuf,
}

/// Parameters for [`RemoteBuildCache::delete`]
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub artifact_name: String,
    pub limit: Option<usize>,
    /// Keep the most recent match and delete the rest
    pub skip_latest: bool,
}

/// Capability interface over a remote artifact store
#[async_trait]
pub trait RemoteBuildCache: Send + Sync {
    /// Human-readable provider name for messages
    fn name(&self) -> &str;

    /// List artifacts, most recent first where the backend has timestamps
    async fn list(&self, request: ListRequest) -> RockResult<Vec<RemoteArtifact>>;

    /// Start downloading the most recent artifact called `artifact_name`
    async fn download(&self, artifact_name: &str) -> RockResult<Option<RemoteDownload>>;

    /// Upload a packed artifact
    async fn upload(&self, request: UploadRequest) -> RockResult<RemoteArtifact>;

    /// Delete matching artifacts, returning what was deleted
    async fn delete(&self, request: DeleteRequest) -> RockResult<Vec<RemoteArtifact>>;
}

/// Configured remote provider, before any credentials are looked up
#[derive(Clone, Default)]
pub enum RemoteCacheSetting {
    #[default]
    None,
    Github,
    S3,
    /// Caller-supplied implementation
    Custom(Arc<dyn RemoteBuildCache>),
}

impl RemoteCacheSetting {
    pub fn from_config(config: &RemoteCacheConfig) -> Self {
        match config.provider {
            ProviderKind::None => Self::None,
            ProviderKind::Github => Self::Github,
            ProviderKind::S3 => Self::S3,
        }
    }
}

impl fmt::Debug for RemoteCacheSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Github => f.write_str("Github"),
            Self::S3 => f.write_str("S3"),
            Self::Custom(remote) => write!(f, "Custom({})", remote.name()),
        }
    }
}

/// Resolve a provider setting into a ready-to-use remote cache.
///
/// `Ok(None)` means no remote cache is configured.
pub async fn create_remote_cache(
    setting: RemoteCacheSetting,
    config: &RemoteCacheConfig,
) -> RockResult<Option<Arc<dyn RemoteBuildCache>>> {
    match setting {
        RemoteCacheSetting::None => Ok(None),
        RemoteCacheSetting::Custom(remote) => Ok(Some(remote)),
        RemoteCacheSetting::Github => {
            let token = GithubCredentials::resolve_token(&config.github).await?;
            let cache = GithubBuildCache::new(config.github.clone(), token)?;
            Ok(Some(Arc::new(cache)))
        }
        RemoteCacheSetting::S3 => {
            let cache = S3BuildCache::from_config(&config.s3)?;
            Ok(Some(Arc::new(cache)))
        }
    }
}

/// Shared HTTP agent settings. Status codes are inspected by each backend,
/// so they are not turned into transport errors.
pub(crate) fn http_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_connect(Some(Duration::from_secs(30)))
        .build();
    ureq::Agent::new_with_config(config)
}

/// Run blocking HTTP work off the async runtime
pub(crate) async fn blocking<T, F>(f: F) -> RockResult<T>
where
    F: FnOnce() -> RockResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RockError::Internal(format!("remote task failed: {}", e)))?
}

/// Pick which of `matches` (most recent first) a delete should remove
pub(crate) fn delete_candidates(
    mut matches: Vec<RemoteArtifact>,
    request: &DeleteRequest,
) -> Vec<RemoteArtifact> {
    if request.skip_latest && !matches.is_empty() {
        matches.remove(0);
    }
    if let Some(limit) = request.limit {
        matches.truncate(limit);
    }
    matches
}

/// Sort newest first; artifacts without a timestamp keep their order at the end
pub(crate) fn sort_by_recency(artifacts: &mut [RemoteArtifact]) {
    artifacts.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
