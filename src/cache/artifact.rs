//! Artifact naming
//!
//! The artifact name is the cache key shared by the local and remote tiers:
//! `rock-<platform>-<trait>...-<fingerprint>`. A source change produces a new
//! fingerprint and therefore a new name; old entries are orphaned, never
//! invalidated in place.

use crate::error::RockResult;
use crate::fingerprint::{native_fingerprint, Fingerprint, FingerprintOptions};
use crate::platform::Platform;
use std::path::Path;

/// Prefix of every artifact name
pub const ARTIFACT_PREFIX: &str = "rock";

/// Render an artifact name. Traits keep the caller's order; empty traits are
/// dropped so the name never contains a doubled separator.
pub fn render_artifact_name<S: AsRef<str>>(platform: Platform, traits: &[S], hash: &str) -> String {
    let mut parts = vec![ARTIFACT_PREFIX, platform.as_str()];
    parts.extend(
        traits
            .iter()
            .map(|t| t.as_ref().trim())
            .filter(|t| !t.is_empty()),
    );
    parts.push(hash);
    parts.join("-")
}

/// Platform encoded in an artifact name, if it follows the
/// `rock-<platform>-` layout. Names passed with `--name` may not.
pub fn artifact_platform(name: &str) -> Option<Platform> {
    let rest = name.strip_prefix(ARTIFACT_PREFIX)?.strip_prefix('-')?;
    Platform::all().iter().copied().find(|platform| {
        rest.strip_prefix(platform.as_str())
            .is_some_and(|tail| tail.starts_with('-'))
    })
}

/// Fingerprint `root` for `platform` and render the artifact name
pub async fn format_artifact_name<S: AsRef<str>>(
    platform: Platform,
    traits: &[S],
    root: &Path,
    options: &FingerprintOptions,
) -> RockResult<String> {
    let (name, _) = format_artifact_name_with_fingerprint(platform, traits, root, options).await?;
    Ok(name)
}

/// Like [`format_artifact_name`], also returning the fingerprint breakdown
pub async fn format_artifact_name_with_fingerprint<S: AsRef<str>>(
    platform: Platform,
    traits: &[S],
    root: &Path,
    options: &FingerprintOptions,
) -> RockResult<(String, Fingerprint)> {
    let fingerprint = native_fingerprint(root, Some(platform), options).await?;
    let name = render_artifact_name(platform, traits, &fingerprint.hash);
    Ok((name, fingerprint))
}

/// Parse a comma separated `--traits` value
pub fn parse_traits(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
