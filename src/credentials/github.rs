//! GitHub token discovery

use crate::config::schema::GithubConfig;
use crate::error::{RockError, RockResult};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Environment variable checked before falling back to the gh CLI
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// GitHub credential provider
pub struct GithubCredentials;

impl GithubCredentials {
    /// Find a token: config, then `GITHUB_TOKEN`, then `gh auth token`
    pub async fn resolve_token(config: &GithubConfig) -> RockResult<String> {
        if let Some(token) = config.token.as_deref().filter(|t| !t.trim().is_empty()) {
            debug!("Using GitHub token from config");
            return Ok(token.trim().to_string());
        }
        if let Some(token) = Self::from_env() {
            debug!("Using GitHub token from {}", GITHUB_TOKEN_ENV);
            return Ok(token);
        }
        Self::get_token(config).await
    }

    /// Token from the environment, ignoring blank values
    pub fn from_env() -> Option<String> {
        std::env::var(GITHUB_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Get GitHub token from gh CLI
    pub async fn get_token(config: &GithubConfig) -> RockResult<String> {
        debug!("Getting GitHub token from gh CLI...");

        let mut cmd = Command::new("gh");
        cmd.args(["auth", "token"]);

        if config.host != "github.com" {
            cmd.args(["--hostname", &config.host]);
        }

        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                not_authenticated("no token configured and the gh CLI is not installed")
            } else {
                RockError::command_failed("gh auth token", e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not logged in") || stderr.contains("gh auth login") {
                return Err(not_authenticated("gh CLI is not logged in"));
            }
            return Err(RockError::User(format!(
                "gh auth token failed: {}",
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if token.is_empty() {
            return Err(not_authenticated("gh CLI returned an empty token"));
        }

        Ok(token)
    }
}

fn not_authenticated(reason: &str) -> RockError {
    RockError::remote_auth("GitHub", reason)
}
