//! S3-compatible object storage backend
//!
//! Each artifact is a single object at `<directory>/<artifact_name>.zip`.
//! Every request goes through a SigV4 presigned URL, so the same code path
//! works against AWS, R2, MinIO and friends.

use super::sigv4::{presign_url, PresignRequest};
use super::{
    blocking, delete_candidates, http_agent, sort_by_recency, DeleteRequest, ListRequest,
    RemoteArtifact, RemoteBuildCache, RemoteDownload, UploadRequest,
};
use crate::config::schema::S3Config;
use crate::credentials::AwsCredentials;
use crate::error::{RockError, RockResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const PROVIDER: &str = "S3";

/// S3 error codes that mean the credentials are wrong or expired
const AUTH_ERROR_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "AccessDenied",
];

/// S3 remote build cache
#[derive(Clone)]
pub struct S3BuildCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for S3BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BuildCache").finish_non_exhaustive()
    }
}

struct Inner {
    agent: ureq::Agent,
    bucket: String,
    region: String,
    scheme: String,
    host: String,
    path_style: bool,
    directory: String,
    credentials: AwsCredentials,
    expiry_secs: u64,
}

impl S3BuildCache {
    /// Build a backend from config, resolving credentials
    pub fn from_config(config: &S3Config) -> RockResult<Self> {
        let credentials = AwsCredentials::resolve(config)?;
        Self::new(config, credentials)
    }

    /// Build a backend with explicit credentials
    pub fn new(config: &S3Config, credentials: AwsCredentials) -> RockResult<Self> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| RockError::ProviderConfig {
                provider: PROVIDER.to_string(),
                reason: "remote_cache.s3.bucket is not set".to_string(),
            })?;

        let (scheme, base_host) = match &config.endpoint {
            Some(endpoint) => split_endpoint(endpoint)?,
            None => (
                "https".to_string(),
                format!("s3.{}.amazonaws.com", config.region),
            ),
        };
        let path_style = config.force_path_style;
        let host = if path_style {
            base_host
        } else {
            format!("{}.{}", bucket, base_host)
        };

        Ok(Self {
            inner: Arc::new(Inner {
                agent: http_agent(),
                bucket,
                region: config.region.clone(),
                scheme,
                host,
                path_style,
                directory: config.directory.trim_matches('/').to_string(),
                credentials,
                expiry_secs: config.presign_expiry_secs,
            }),
        })
    }
}

impl Inner {
    fn object_key(&self, artifact_name: &str) -> String {
        if self.directory.is_empty() {
            format!("{}.zip", artifact_name)
        } else {
            format!("{}/{}.zip", self.directory, artifact_name)
        }
    }

    fn key_prefix(&self) -> String {
        if self.directory.is_empty() {
            String::new()
        } else {
            format!("{}/", self.directory)
        }
    }

    /// Artifact name for an object key, if the key is one of ours
    fn artifact_name(&self, key: &str) -> Option<String> {
        key.strip_prefix(&self.key_prefix())?
            .strip_suffix(".zip")
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(str::to_string)
    }

    fn presign(&self, method: &str, key: &str, query: &[(&str, &str)]) -> RockResult<String> {
        let path = if self.path_style {
            format!("/{}/{}", self.bucket, key)
        } else {
            format!("/{}", key)
        };
        presign_url(
            &self.credentials,
            &self.region,
            &PresignRequest {
                method,
                scheme: &self.scheme,
                host: &self.host,
                path: &path,
                query,
            },
            Utc::now(),
            self.expiry_secs,
        )
    }

    fn bucket_url(&self, query: &[(&str, &str)]) -> RockResult<String> {
        let path = if self.path_style {
            format!("/{}", self.bucket)
        } else {
            "/".to_string()
        };
        presign_url(
            &self.credentials,
            &self.region,
            &PresignRequest {
                method: "GET",
                scheme: &self.scheme,
                host: &self.host,
                path: &path,
                query,
            },
            Utc::now(),
            self.expiry_secs,
        )
    }

    fn list_blocking(&self, request: &ListRequest) -> RockResult<Vec<RemoteArtifact>> {
        let prefix = format!(
            "{}{}",
            self.key_prefix(),
            request.artifact_name.as_deref().unwrap_or("")
        );
        let mut artifacts = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2"), ("prefix", prefix.as_str())];
            if let Some(token) = continuation.as_deref() {
                query.push(("continuation-token", token));
            }
            let url = self.bucket_url(&query)?;
            let response = self
                .agent
                .get(&url)
                .call()
                .map_err(|e| RockError::http(PROVIDER, e))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .read_to_string()
                .map_err(|e| RockError::http(PROVIDER, e))?;
            check_status(status, &body)?;

            let page = parse_list_objects(&body)?;
            for object in page.objects {
                let Some(name) = self.artifact_name(&object.key) else {
                    continue;
                };
                // The prefix query also matches longer names
                if request
                    .artifact_name
                    .as_deref()
                    .is_some_and(|wanted| wanted != name)
                {
                    continue;
                }
                artifacts.push(RemoteArtifact {
                    url: self.presign("GET", &object.key, &[])?,
                    name,
                    id: Some(object.key),
                    size_in_bytes: object.size,
                    created_at: object.last_modified,
                });
            }

            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation = Some(token),
                _ => break,
            }
        }

        sort_by_recency(&mut artifacts);
        if let Some(limit) = request.limit {
            artifacts.truncate(limit);
        }
        debug!("Listed {} S3 artifacts under {}", artifacts.len(), prefix);
        Ok(artifacts)
    }

    fn download_blocking(&self, artifact_name: &str) -> RockResult<Option<RemoteDownload>> {
        let key = self.object_key(artifact_name);
        let url = self.presign("GET", &key, &[])?;
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| RockError::http(PROVIDER, e))?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc));

        let mut body = response.into_body();
        if !(200..300).contains(&status) {
            let text = body.read_to_string().unwrap_or_default();
            if error_code(&text).as_deref() == Some("NoSuchKey") {
                return Ok(None);
            }
            check_status(status, &text)?;
        }

        let content_length = body.content_length();
        Ok(Some(RemoteDownload {
            artifact: RemoteArtifact {
                name: artifact_name.to_string(),
                url,
                id: Some(key),
                size_in_bytes: content_length,
                created_at: last_modified,
            },
            content_length,
            reader: Box::new(body.into_reader()),
        }))
    }

    fn upload_blocking(&self, request: &UploadRequest) -> RockResult<RemoteArtifact> {
        let bytes = std::fs::read(&request.archive_path).map_err(|e| {
            RockError::io(format!("reading {}", request.archive_path.display()), e)
        })?;
        let key = self.object_key(&request.artifact_name);
        let url = self.presign("PUT", &key, &[])?;
        let response = self
            .agent
            .put(&url)
            .header("Content-Type", "application/zip")
            .send(&bytes[..])
            .map_err(|e| RockError::http(PROVIDER, e))?;
        let status = response.status().as_u16();
        let body = response.into_body().read_to_string().unwrap_or_default();
        check_status(status, &body)?;

        info!("Uploaded {} to s3://{}/{}", request.artifact_name, self.bucket, key);
        Ok(RemoteArtifact {
            name: request.artifact_name.clone(),
            url: self.presign("GET", &key, &[])?,
            id: Some(key),
            size_in_bytes: Some(bytes.len() as u64),
            created_at: Some(Utc::now()),
        })
    }

    fn delete_object(&self, key: &str) -> RockResult<()> {
        let url = self.presign("DELETE", key, &[])?;
        let response = self
            .agent
            .delete(&url)
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
impl RemoteBuildCache for S3BuildCache {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn list(&self, request: ListRequest) -> RockResult<Vec<RemoteArtifact>> {
        let inner = Arc::clone(&self.inner);
        blocking(move || inner.list_blocking(&request)).await
    }

    async fn download(&self, artifact_name: &str) -> RockResult<Option<RemoteDownload>> {
        let inner = Arc::clone(&self.inner);
        let name = artifact_name.to_string();
        blocking(move || inner.download_blocking(&name)).await
    }

    async fn upload(&self, request: UploadRequest) -> RockResult<RemoteArtifact> {
        let inner = Arc::clone(&self.inner);
        blocking(move || inner.upload_blocking(&request)).await
    }

    /// One object per name, so `skip_latest` always leaves it in place
    async fn delete(&self, request: DeleteRequest) -> RockResult<Vec<RemoteArtifact>> {
        let matches: Vec<RemoteArtifact> = self
            .list(ListRequest::named(request.artifact_name.clone()))
            .await?
            .into_iter()
            .filter(|a| a.name == request.artifact_name)
            .collect();
        let doomed = delete_candidates(matches, &request);

        let inner = Arc::clone(&self.inner);
        blocking(move || {
            for artifact in &doomed {
                let key = inner.object_key(&artifact.name);
                inner.delete_object(&key)?;
                info!("Deleted s3://{}/{}", inner.bucket, key);
            }
            Ok(doomed)
        })
        .await
    }
}

/// Split `https://host:port/ignored` into scheme and host
fn split_endpoint(endpoint: &str) -> RockResult<(String, String)> {
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("https".to_string(), endpoint),
    };
    if scheme != "http" && scheme != "https" {
        return Err(RockError::ProviderConfig {
            provider: PROVIDER.to_string(),
            reason: format!("unsupported endpoint scheme '{}'", scheme),
        });
    }
    let host = rest.split('/').next().unwrap_or("").to_string();
    if host.is_empty() {
        return Err(RockError::ProviderConfig {
            provider: PROVIDER.to_string(),
            reason: format!("endpoint '{}' has no host", endpoint),
        });
    }
    Ok((scheme, host))
}

/// Map a non-success S3 response onto the error taxonomy
fn check_status(status: u16, body: &str) -> RockResult<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let error = parse_error_body(body);
    let message = error
        .message
        .or_else(|| error.code.clone())
        .unwrap_or_else(|| format!("HTTP {}", status));

    let is_auth = status == 401
        || error
            .code
            .as_deref()
            .is_some_and(|c| AUTH_ERROR_CODES.contains(&c));
    if is_auth {
        return Err(RockError::remote_auth(PROVIDER, message));
    }
    Err(RockError::RemoteRequest {
        provider: PROVIDER.to_string(),
        status,
        message,
    })
}

/// `<Error>` document returned with failed requests
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct S3ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Error bodies are optional (HEAD, some proxies); anything unparseable is empty
fn parse_error_body(body: &str) -> S3ErrorBody {
    quick_xml::de::from_str(body).unwrap_or_default()
}

fn error_code(body: &str) -> Option<String> {
    parse_error_body(body).code
}

/// The parts of a ListObjectsV2 response we use
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListObjectsPage {
    #[serde(rename = "Contents")]
    objects: Vec<S3Object>,
    #[serde(rename = "IsTruncated")]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken")]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Object {
    key: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    last_modified: Option<DateTime<Utc>>,
}

fn parse_list_objects(xml: &str) -> RockResult<ListObjectsPage> {
    let mut page: ListObjectsPage =
        quick_xml::de::from_str(xml).map_err(|e| RockError::RemoteResponse {
            provider: PROVIDER.to_string(),
            reason: format!("invalid ListObjectsV2 body: {}", e),
        })?;
    // An empty `<NextContinuationToken/>` means there is no next page
    page.next_continuation_token = page.next_continuation_token.filter(|t| !t.is_empty());
    Ok(page)
}
