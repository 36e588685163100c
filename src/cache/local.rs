//! Local build cache
//!
//! Built binaries live under `<cache_root>/remote-build/<artifact_name>/`,
//! keeping their original basename. An entry is only visible once it has
//! been renamed into place from a staging directory, so a reader never sees
//! a half-copied or half-extracted artifact.

use crate::cache::artifact::artifact_platform;
use crate::error::{RockError, RockResult};
use crate::platform::{is_binary_path, ALL_BINARY_EXTENSIONS};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Directory below the cache root holding saved builds
pub const BUILD_CACHE_DIR: &str = "remote-build";

/// Prefix of staging directories; never a valid artifact name
const STAGING_PREFIX: &str = ".staging-";

/// A build stored in the local cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBuild {
    /// Artifact name (cache key)
    pub name: String,
    /// Cache directory for this artifact
    pub artifact_path: PathBuf,
    /// Binary located inside `artifact_path`
    pub binary_path: PathBuf,
}

/// Filesystem-backed store of built binaries keyed by artifact name
#[derive(Debug, Clone)]
pub struct LocalBuildCache {
    builds_dir: PathBuf,
}

impl LocalBuildCache {
    /// Create a cache rooted at `cache_root`
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            builds_dir: cache_root.as_ref().join(BUILD_CACHE_DIR),
        }
    }

    /// Directory holding every saved artifact
    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    /// Directory an artifact is (or would be) stored in
    pub fn artifact_dir(&self, artifact_name: &str) -> PathBuf {
        self.builds_dir.join(artifact_name)
    }

    /// Copy a freshly built binary into the cache.
    ///
    /// Failures are logged and reported as `None`; a cache write never fails
    /// the build that produced the binary.
    pub async fn save(&self, artifact_name: &str, binary_path: &Path) -> Option<LocalBuild> {
        let cache = self.clone();
        let name = artifact_name.to_string();
        let binary = binary_path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || cache.save_blocking(&name, &binary))
            .await
            .map_err(|e| RockError::Internal(format!("cache save task failed: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(build) => {
                info!(
                    "Saved {} to local cache at {}",
                    build.name,
                    build.binary_path.display()
                );
                Some(build)
            }
            Err(e) => {
                warn!(
                    "Failed to save {} to local cache: {}",
                    binary_path.display(),
                    e
                );
                None
            }
        }
    }

    /// Blocking body of [`save`](Self::save), returning the error instead of logging it
    pub fn save_blocking(&self, artifact_name: &str, binary_path: &Path) -> RockResult<LocalBuild> {
        validate_artifact_name(artifact_name)?;
        let meta = fs::symlink_metadata(binary_path)
            .map_err(|_| RockError::PathNotFound(binary_path.to_path_buf()))?;
        let file_name = binary_path
            .file_name()
            .ok_or_else(|| RockError::BinaryNotFound(binary_path.to_path_buf()))?;

        let staging = self.staging_dir()?;
        let staged = staging.path().join(file_name);
        if meta.is_dir() {
            copy_tree(binary_path, &staged)
        } else {
            fs::copy(binary_path, &staged).map(|_| ())
        }
        .map_err(|e| RockError::io(format!("copying {}", binary_path.display()), e))?;

        self.install(artifact_name, staging)
    }

    /// Create an empty staging directory on the same filesystem as the cache
    pub fn staging_dir(&self) -> RockResult<TempDir> {
        fs::create_dir_all(&self.builds_dir)
            .map_err(|e| RockError::io(format!("creating {}", self.builds_dir.display()), e))?;
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.builds_dir)
            .map_err(|e| RockError::io("creating staging directory", e))
    }

    /// Move a populated staging directory into place as `artifact_name`.
    ///
    /// Fails with [`RockError::BinaryNotFound`] when the staged tree holds no
    /// recognisable binary; the staging directory is removed either way.
    pub fn install(&self, artifact_name: &str, staging: TempDir) -> RockResult<LocalBuild> {
        validate_artifact_name(artifact_name)?;
        if find_binary(staging.path(), binary_extensions(artifact_name)).is_none() {
            return Err(RockError::BinaryNotFound(staging.path().to_path_buf()));
        }

        let target = self.artifact_dir(artifact_name);
        if target.exists() {
            // Move the old entry aside first so the swap itself is a single rename
            let retired = self.builds_dir.join(format!(
                "{}{}-old",
                STAGING_PREFIX,
                uuid::Uuid::new_v4().simple()
            ));
            fs::rename(&target, &retired)
                .map_err(|e| RockError::io(format!("retiring {}", target.display()), e))?;
            if let Err(e) = fs::remove_dir_all(&retired) {
                debug!("Could not remove {}: {}", retired.display(), e);
            }
        }

        fs::rename(staging.path(), &target)
            .map_err(|e| RockError::io(format!("moving artifact into {}", target.display()), e))?;
        // The TempDir guard now points at a path that no longer exists; dropping it is a no-op
        drop(staging);

        self.query(artifact_name)
            .ok_or_else(|| RockError::BinaryNotFound(target.clone()))
    }

    /// Look up a saved build. `None` when the directory is missing or holds
    /// no recognisable binary.
    pub fn query(&self, artifact_name: &str) -> Option<LocalBuild> {
        if validate_artifact_name(artifact_name).is_err() {
            return None;
        }
        let artifact_path = self.artifact_dir(artifact_name);
        if !artifact_path.is_dir() {
            return None;
        }
        let binary_path = find_binary(&artifact_path, binary_extensions(artifact_name))?;
        Some(LocalBuild {
            name: artifact_name.to_string(),
            artifact_path,
            binary_path,
        })
    }

    /// Binary path of a saved build, logging the hit
    pub fn binary_path(&self, artifact_name: &str) -> Option<PathBuf> {
        let build = self.query(artifact_name)?;
        info!(
            "Found build cache {} at {}",
            artifact_name,
            build.binary_path.display()
        );
        Some(build.binary_path)
    }

    /// Every saved build, sorted by name. Staging leftovers are skipped.
    pub fn list(&self) -> RockResult<Vec<LocalBuild>> {
        let entries = match fs::read_dir(&self.builds_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(RockError::io(
                    format!("reading {}", self.builds_dir.display()),
                    e,
                ))
            }
        };

        let mut builds: Vec<LocalBuild> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with(STAGING_PREFIX))
            .filter_map(|name| self.query(&name))
            .collect();
        builds.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(builds)
    }

    /// Delete one saved build. Returns whether it existed.
    pub fn remove(&self, artifact_name: &str) -> RockResult<bool> {
        validate_artifact_name(artifact_name)?;
        let dir = self.artifact_dir(artifact_name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RockError::io(format!("removing {}", dir.display()), e)),
        }
    }

    /// Delete every saved build and staging leftover. Returns the number of
    /// entries removed.
    pub fn clean(&self) -> RockResult<usize> {
        let entries = match fs::read_dir(&self.builds_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(RockError::io(
                    format!("reading {}", self.builds_dir.display()),
                    e,
                ))
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| RockError::io(format!("removing {}", path.display()), e))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Total size in bytes of a file or directory tree (symlinks count as zero)
pub fn disk_usage(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if meta.is_file() {
        return meta.len();
    }
    if !meta.is_dir() {
        return 0;
    }
    fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| disk_usage(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Find the first binary below `dir`, breadth first with sorted siblings.
///
/// Matched bundles (`.app`) are returned as a whole and never descended
/// into. Symlinks are not followed.
pub fn find_binary(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let mut queue = VecDeque::from([dir.to_path_buf()]);
    while let Some(current) = queue.pop_front() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
        entries.sort_by_key(|e| e.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                continue;
            }
            let path = entry.path();
            if is_binary_path(&path, extensions) {
                return Some(path);
            }
            if file_type.is_dir() {
                subdirs.push(path);
            }
        }
        queue.extend(subdirs);
    }
    None
}

/// Binaries an entry may hold: those of the platform in its name, or any
/// known binary when the name carries no platform
pub fn binary_extensions(artifact_name: &str) -> &'static [&'static str] {
    artifact_platform(artifact_name)
        .map(|platform| platform.binary_extensions())
        .unwrap_or(ALL_BINARY_EXTENSIONS)
}

/// Reject names that would escape the builds directory
pub fn validate_artifact_name(name: &str) -> RockResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(RockError::User(format!("Invalid artifact name: '{}'", name)))
    }
}

/// Recursively copy a directory, recreating symlinks instead of following them
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    fs::set_permissions(dst, fs::metadata(src)?.permissions())?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (TempDir, LocalBuildCache) {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[tokio::test]
    async fn save_then_query_roundtrip() {
        let (dir, cache) = cache();
        let apk = dir.path().join("app.apk");
        fs::write(&apk, b"apk bytes").unwrap();

        let saved = cache.save("X", &apk).await.unwrap();
        let found = cache.query("X").unwrap();

        assert_eq!(saved, found);
        assert_eq!(found.artifact_path, cache.builds_dir().join("X"));
        assert_eq!(found.binary_path, cache.builds_dir().join("X/app.apk"));
        assert_eq!(fs::read(&found.binary_path).unwrap(), b"apk bytes");
    }

    #[test]
    fn query_missing_artifact() {
        let (_dir, cache) = cache();
        assert!(cache.query("nonexistent").is_none());
        assert!(cache.binary_path("nonexistent").is_none());
    }

    #[test]
    fn query_without_recognisable_binary() {
        let (_dir, cache) = cache();
        let artifact = cache.artifact_dir("rock-android-abc");
        fs::create_dir_all(&artifact).unwrap();
        fs::write(artifact.join("notes.txt"), "hi").unwrap();

        assert!(cache.query("rock-android-abc").is_none());
    }

    #[tokio::test]
    async fn save_missing_binary_is_logged_not_thrown() {
        let (dir, cache) = cache();
        assert!(cache.save("X", &dir.path().join("missing.apk")).await.is_none());
        assert!(cache.query("X").is_none());
        assert!(cache.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_wholesale() {
        let (dir, cache) = cache();
        let debug = dir.path().join("app-debug.apk");
        let release = dir.path().join("app-release.apk");
        fs::write(&debug, b"debug").unwrap();
        fs::write(&release, b"release").unwrap();

        cache.save("X", &debug).await.unwrap();
        let second = cache.save("X", &release).await.unwrap();

        assert_eq!(second.binary_path.file_name().unwrap(), "app-release.apk");
        assert!(!cache.artifact_dir("X").join("app-debug.apk").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_app_bundle_directory() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, cache) = cache();
        let app = dir.path().join("build/HelloWorld.app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("HelloWorld"), b"exe").unwrap();
        fs::set_permissions(app.join("HelloWorld"), fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("HelloWorld", app.join("alias")).unwrap();

        let build = cache.save("rock-ios-simulator-abc", &app).await.unwrap();

        assert_eq!(build.binary_path.file_name().unwrap(), "HelloWorld.app");
        let mode = fs::metadata(build.binary_path.join("HelloWorld"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
        assert!(fs::symlink_metadata(build.binary_path.join("alias"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[tokio::test]
    async fn binary_must_match_platform_in_name() {
        let (dir, cache) = cache();
        let app = dir.path().join("HelloWorld.app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("HelloWorld"), b"exe").unwrap();

        assert!(cache.save("rock-android-debug-abc", &app).await.is_none());
        assert!(!cache.artifact_dir("rock-android-debug-abc").exists());

        let planted = cache.artifact_dir("rock-android-release-abc");
        fs::create_dir_all(planted.join("HelloWorld.app")).unwrap();
        assert!(cache.query("rock-android-release-abc").is_none());

        assert!(cache.save("rock-ios-simulator-abc", &app).await.is_some());
        assert!(cache.save("custom-name", &app).await.is_some());
    }

    #[test]
    fn install_rejects_empty_staging() {
        let (_dir, cache) = cache();
        let staging = cache.staging_dir().unwrap();
        let staged_path = staging.path().to_path_buf();
        fs::write(staged_path.join("readme.md"), "no binary").unwrap();

        let err = cache.install("X", staging).unwrap_err();

        assert!(matches!(err, RockError::BinaryNotFound(_)));
        assert!(!staged_path.exists());
        assert!(!cache.artifact_dir("X").exists());
    }

    #[tokio::test]
    async fn list_remove_clean() {
        let (dir, cache) = cache();
        let apk = dir.path().join("app.apk");
        fs::write(&apk, b"apk").unwrap();
        cache.save("rock-android-b", &apk).await.unwrap();
        cache.save("rock-android-a", &apk).await.unwrap();
        let _leftover = cache.staging_dir().unwrap();

        let names: Vec<_> = cache.list().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["rock-android-a", "rock-android-b"]);

        assert!(cache.remove("rock-android-a").unwrap());
        assert!(!cache.remove("rock-android-a").unwrap());
        assert_eq!(cache.clean().unwrap(), 2);
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn artifact_names_cannot_escape_cache() {
        let (_dir, cache) = cache();
        assert!(cache.query("../etc").is_none());
        assert!(cache.remove("a/b").is_err());
        assert!(cache.remove(".staging-x").is_err());
    }

    #[test]
    fn find_binary_prefers_shallow_and_stops_at_bundles() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/deep")).unwrap();
        fs::write(dir.path().join("a/deep/inner.apk"), "x").unwrap();
        fs::create_dir_all(dir.path().join("b/Foo.app/Plugins/Ext.app")).unwrap();
        fs::write(dir.path().join("top.ipa"), "x").unwrap();

        assert_eq!(
            find_binary(dir.path(), ALL_BINARY_EXTENSIONS).unwrap(),
            dir.path().join("top.ipa")
        );
        assert_eq!(
            find_binary(dir.path(), &["app"]).unwrap(),
            dir.path().join("b/Foo.app")
        );
        assert!(find_binary(dir.path(), &["hap"]).is_none());
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn disk_usage_sums_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::write(dir.path().join("x/a"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("b"), [0u8; 5]).unwrap();
        assert_eq!(disk_usage(dir.path()), 15);
    }
}
