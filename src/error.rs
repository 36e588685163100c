//! Error types for Rock
//!
//! All modules use `RockResult<T>` as their return type. Cache misses are
//! modelled as `Option::None`, never as an error variant.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Rock operations
pub type RockResult<T> = Result<T, RockError>;

/// All errors that can occur in Rock
#[derive(Error, Debug)]
pub enum RockError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("Incompatible flags: {0}")]
    IncompatibleFlags(String),

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Remote cache provider is not configured")]
    RemoteNotConfigured,

    #[error("Remote cache provider misconfigured ({provider}): {reason}")]
    ProviderConfig { provider: String, reason: String },

    // Remote cache errors
    #[error("Authentication with {provider} failed: {reason}")]
    RemoteAuth { provider: String, reason: String },

    #[error("{provider} request failed with status {status}: {message}")]
    RemoteRequest {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("HTTP error talking to {provider}: {source}")]
    Http {
        provider: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("Malformed response from {provider}: {reason}")]
    RemoteResponse { provider: String, reason: String },

    #[error("{provider} does not support {operation}")]
    UnsupportedOperation {
        provider: String,
        operation: &'static str,
    },

    // Artifact errors
    #[error("Archive error for {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("No binary found in {0}")]
    BinaryNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl RockError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an authentication error for a remote provider
    pub fn remote_auth(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteAuth {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a transport-level HTTP error
    pub fn http(provider: impl Into<String>, source: ureq::Error) -> Self {
        Self::Http {
            provider: provider.into(),
            source: Box::new(source),
        }
    }

    /// Create an archive error
    pub fn archive(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::RemoteRequest { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidPlatform(_) => Some("Use one of: android, ios, harmony"),
            Self::RemoteNotConfigured => {
                Some("Set [remote_cache] provider = \"github\" or \"s3\" in rock.toml")
            }
            Self::RemoteAuth { provider, .. } if provider == "GitHub" => Some(
                "Set GITHUB_TOKEN to a token with the `repo` scope or run: gh auth login",
            ),
            Self::RemoteAuth { .. } => Some(
                "Check AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY or [remote_cache.s3] credentials",
            ),
            Self::UnsupportedOperation { .. } => {
                Some("Upload artifacts from CI with the provider's own tooling")
            }
            e if e.is_retryable() => Some("The provider may be temporarily unavailable, try again"),
            _ => None,
        }
    }
}
