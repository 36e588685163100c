//! CLI command implementations

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod remote_cache;
pub mod resolve;

pub use cache::execute as cache;
pub use config::execute as config;
pub use fingerprint::execute as fingerprint;
pub use remote_cache::execute as remote_cache;
pub use resolve::execute as resolve_binary;

use crate::cache::{format_artifact_name, parse_traits, validate_artifact_name, LocalBuildCache};
use crate::cli::args::ArtifactArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{RockError, RockResult};
use crate::fingerprint::FingerprintOptions;
use crate::platform::Platform;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve `--source`, defaulting to the working directory
pub(crate) fn project_root(source: Option<&Path>) -> RockResult<PathBuf> {
    let root = match source {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| RockError::io("getting current directory", e))?,
    };
    if !root.is_dir() {
        return Err(RockError::PathNotFound(root));
    }
    Ok(root)
}

/// Parse `--platform`, treating its absence as a validation failure
pub(crate) fn require_platform(value: Option<&str>) -> RockResult<Platform> {
    match value {
        Some(value) => value.parse(),
        None => Err(RockError::InvalidPlatform("--platform is required".to_string())),
    }
}

/// Artifact name from `--name`, or from platform, traits and the current fingerprint
pub(crate) async fn resolve_artifact_name(
    args: &ArtifactArgs,
    config: &Config,
) -> RockResult<String> {
    if let Some(name) = &args.name {
        if args.traits.is_some() {
            return Err(RockError::IncompatibleFlags(
                "--name cannot be combined with --traits".to_string(),
            ));
        }
        validate_artifact_name(name)?;
        return Ok(name.clone());
    }

    let platform = require_platform(args.platform.as_deref())?;
    let root = project_root(args.source.as_deref())?;
    let traits = args.traits.as_deref().map(parse_traits).unwrap_or_default();
    let options = FingerprintOptions::from_config(&config.fingerprint, &config.cache);
    let name = format_artifact_name(platform, &traits, &root, &options).await?;
    debug!("Artifact name: {}", name);
    Ok(name)
}

/// Local build cache under the configured root
pub(crate) fn local_cache(config: &Config) -> LocalBuildCache {
    LocalBuildCache::new(ConfigManager::cache_root(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_platform_is_invalid() {
        assert!(matches!(
            require_platform(None),
            Err(RockError::InvalidPlatform(_))
        ));
        assert!(matches!(
            require_platform(Some("windows")),
            Err(RockError::InvalidPlatform(_))
        ));
        assert_eq!(require_platform(Some("ios")).unwrap(), Platform::Ios);
    }

    #[test]
    fn project_root_must_exist() {
        let dir = TempDir::new().unwrap();
        assert_eq!(project_root(Some(dir.path())).unwrap(), dir.path());
        assert!(matches!(
            project_root(Some(&dir.path().join("missing"))),
            Err(RockError::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn explicit_name_skips_fingerprint() {
        let args = ArtifactArgs {
            name: Some("rock-ios-debug-abc".to_string()),
            ..ArtifactArgs::default()
        };
        let name = resolve_artifact_name(&args, &Config::default()).await.unwrap();
        assert_eq!(name, "rock-ios-debug-abc");
    }

    #[tokio::test]
    async fn name_and_traits_conflict() {
        let args = ArtifactArgs {
            name: Some("rock-ios-abc".to_string()),
            traits: Some("debug".to_string()),
            ..ArtifactArgs::default()
        };
        let err = resolve_artifact_name(&args, &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RockError::IncompatibleFlags(_)));
    }

    #[tokio::test]
    async fn computed_name_uses_platform_and_traits() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("android")).unwrap();
        std::fs::write(dir.path().join("android/build.gradle"), "android {}").unwrap();

        let args = ArtifactArgs {
            platform: Some("android".to_string()),
            traits: Some("debug".to_string()),
            name: None,
            source: Some(dir.path().to_path_buf()),
        };
        let name = resolve_artifact_name(&args, &Config::default()).await.unwrap();
        assert!(name.starts_with("rock-android-debug-"));
        assert_eq!(name.len(), "rock-android-debug-".len() + 64);
    }
}
