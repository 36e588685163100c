//! AWS credentials for the S3 backend

use crate::config::schema::S3Config;
use crate::error::{RockError, RockResult};
use tracing::debug;

/// Static access keys used to sign S3 requests
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Keys from config, falling back to the standard AWS variables
    pub fn resolve(config: &S3Config) -> RockResult<Self> {
        let access_key_id = pick(&config.access_key_id, "AWS_ACCESS_KEY_ID");
        let secret_access_key = pick(&config.secret_access_key, "AWS_SECRET_ACCESS_KEY");
        let session_token = pick(&config.session_token, "AWS_SESSION_TOKEN");

        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                debug!("Using AWS access key {}", redact(&access_key_id));
                Ok(Self {
                    access_key_id,
                    secret_access_key,
                    session_token,
                })
            }
            _ => Err(RockError::remote_auth(
                "S3",
                "no access key configured (set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY)",
            )),
        }
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

fn pick(configured: &Option<String>, env: &str) -> Option<String> {
    configured
        .clone()
        .or_else(|| std::env::var(env).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn redact(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}****", visible)
}
