//! GitHub Actions artifacts backend
//!
//! Artifacts are uploaded by CI workflows, so this backend can list,
//! download and delete but not upload.

use super::{
    blocking, delete_candidates, http_agent, sort_by_recency, DeleteRequest, ListRequest,
    RemoteArtifact, RemoteBuildCache, RemoteDownload, UploadRequest, USER_AGENT,
};
use crate::config::schema::GithubConfig;
use crate::error::{RockError, RockResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const PROVIDER: &str = "GitHub";

/// Largest page the artifacts API serves
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ArtifactPage {
    total_count: usize,
    artifacts: Vec<GithubArtifact>,
}

#[derive(Debug, Deserialize)]
struct GithubArtifact {
    id: u64,
    name: String,
    #[serde(default)]
    size_in_bytes: Option<u64>,
    archive_download_url: String,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<GithubArtifact> for RemoteArtifact {
    fn from(artifact: GithubArtifact) -> Self {
        Self {
            name: artifact.name,
            url: artifact.archive_download_url,
            id: Some(artifact.id.to_string()),
            size_in_bytes: artifact.size_in_bytes,
            created_at: artifact.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// GitHub Actions remote build cache
#[derive(Clone)]
pub struct GithubBuildCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for GithubBuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubBuildCache").finish_non_exhaustive()
    }
}

struct Inner {
    agent: ureq::Agent,
    api_url: String,
    owner: String,
    repository: String,
    token: String,
}

impl GithubBuildCache {
    /// Create a backend for `owner/repository` authenticated with `token`
    pub fn new(config: GithubConfig, token: String) -> RockResult<Self> {
        let missing = |field: &str| RockError::ProviderConfig {
            provider: PROVIDER.to_string(),
            reason: format!("remote_cache.github.{} is not set", field),
        };
        let owner = config
            .owner
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| missing("owner"))?;
        let repository = config
            .repository
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| missing("repository"))?;

        Ok(Self {
            inner: Arc::new(Inner {
                agent: http_agent(),
                api_url: config.api_url.trim_end_matches('/').to_string(),
                owner,
                repository,
                token,
            }),
        })
    }
}

impl Inner {
    fn artifacts_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/actions/artifacts",
            self.api_url, self.owner, self.repository
        )
    }

    fn authed<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        request
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT)
    }

    fn list_blocking(&self, request: &ListRequest) -> RockResult<Vec<RemoteArtifact>> {
        let mut artifacts = Vec::new();
        let mut seen = 0;
        let mut page = 1;

        loop {
            let page_param = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let mut call = self
                .authed(self.agent.get(&self.artifacts_url()))
                .query("per_page", &per_page)
                .query("page", &page_param);
            if let Some(name) = request.artifact_name.as_deref() {
                call = call.query("name", name);
            }
            let response = call.call().map_err(|e| RockError::http(PROVIDER, e))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .read_to_string()
                .map_err(|e| RockError::http(PROVIDER, e))?;
            check_status(status, &body)?;

            let parsed: ArtifactPage =
                serde_json::from_str(&body).map_err(|e| RockError::RemoteResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;
            let fetched = parsed.artifacts.len();
            seen += fetched;
            artifacts.extend(
                parsed
                    .artifacts
                    .into_iter()
                    .filter(|a| !a.expired)
                    .map(RemoteArtifact::from),
            );

            let enough = request.limit.is_some_and(|limit| artifacts.len() >= limit);
            if fetched == 0 || seen >= parsed.total_count || enough {
                break;
            }
            page += 1;
        }

        sort_by_recency(&mut artifacts);
        if let Some(limit) = request.limit {
            artifacts.truncate(limit);
        }
        debug!(
            "Listed {} GitHub artifacts for {}/{}",
            artifacts.len(),
            self.owner,
            self.repository
        );
        Ok(artifacts)
    }

    fn download_blocking(&self, artifact: RemoteArtifact) -> RockResult<Option<RemoteDownload>> {
        // The archive URL redirects to blob storage; the token is not forwarded there
        let response = self
            .authed(self.agent.get(&artifact.url))
            .call()
            .map_err(|e| RockError::http(PROVIDER, e))?;
        let status = response.status().as_u16();
        if status == 404 || status == 410 {
            return Ok(None);
        }
        let mut body = response.into_body();
        if !(200..300).contains(&status) {
            let text = body.read_to_string().unwrap_or_default();
            check_status(status, &text)?;
        }

        let content_length = body.content_length().or(artifact.size_in_bytes);
        Ok(Some(RemoteDownload {
            artifact,
            content_length,
            reader: Box::new(body.into_reader()),
        }))
    }

    fn delete_blocking(&self, artifact: &RemoteArtifact) -> RockResult<()> {
        let id = artifact.id.as_deref().ok_or_else(|| RockError::RemoteResponse {
            provider: PROVIDER.to_string(),
            reason: format!("artifact {} has no id", artifact.name),
        })?;
        let url = format!("{}/{}", self.artifacts_url(), id);
        let response = self
            .authed(self.agent.delete(&url))
            .call()
            .map_err(|e| RockError::http(PROVIDER, e))?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(());
        }
        let body = response.into_body().read_to_string().unwrap_or_default();
        check_status(status, &body)
    }
}

#[async_trait]
impl RemoteBuildCache for GithubBuildCache {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn list(&self, request: ListRequest) -> RockResult<Vec<RemoteArtifact>> {
        let inner = Arc::clone(&self.inner);
        blocking(move || inner.list_blocking(&request)).await
    }

    async fn download(&self, artifact_name: &str) -> RockResult<Option<RemoteDownload>> {
        let latest = self
            .list(ListRequest {
                artifact_name: Some(artifact_name.to_string()),
                limit: Some(1),
            })
            .await?
            .into_iter()
            .next();
        let Some(artifact) = latest else {
            return Ok(None);
        };

        let inner = Arc::clone(&self.inner);
        blocking(move || inner.download_blocking(artifact)).await
    }

    async fn upload(&self, _request: UploadRequest) -> RockResult<RemoteArtifact> {
        Err(RockError::UnsupportedOperation {
            provider: PROVIDER.to_string(),
            operation: "upload",
        })
    }

    async fn delete(&self, request: DeleteRequest) -> RockResult<Vec<RemoteArtifact>> {
        let matches = self
            .list(ListRequest::named(request.artifact_name.clone()))
            .await?;
        let doomed = delete_candidates(matches, &request);

        let inner = Arc::clone(&self.inner);
        blocking(move || {
            for artifact in &doomed {
                inner.delete_blocking(artifact)?;
                info!(
                    "Deleted GitHub artifact {} ({})",
                    artifact.name,
                    artifact.id.as_deref().unwrap_or("?")
                );
            }
            Ok(doomed)
        })
        .await
    }
}

/// Map a non-success API response onto the error taxonomy
fn check_status(status: u16, body: &str) -> RockResult<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| format!("HTTP {}", status));

    if status == 401 || message.contains("Bad credentials") {
        return Err(RockError::remote_auth(PROVIDER, message));
    }
    Err(RockError::RemoteRequest {
        provider: PROVIDER.to_string(),
        status,
        message,
    })
}
