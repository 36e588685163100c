//! Cache resolution
//!
//! [`get_binary_path`] decides whether a build can be skipped:
//!
//! | Step | Source | Skipped when |
//! |------|--------|--------------|
//! | 1 | `--binary-path` flag | flag absent |
//! | 2 | local build cache | `--local` |
//! | 3 | remote cache (download, extract, save locally) | `--local`, no provider |
//! | 4 | nothing: caller builds | |
//!
//! Remote failures never escape. They are logged with their cause and the
//! caller falls through to a real build.

use crate::cache::archive::{extract_zip, unwrap_bundle_archives};
use crate::cache::artifact::artifact_platform;
use crate::cache::local::{LocalBuild, LocalBuildCache};
use crate::error::{RockError, RockResult};
use crate::fingerprint::{FingerprintOptions, IgnoreRules};
use crate::platform::Platform;
use crate::remote::RemoteBuildCache;
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Temporary name of the downloaded archive inside a staging directory
const DOWNLOAD_FILE: &str = ".rock-download.zip";

/// Most uncommitted paths listed in the skew warning
const MAX_SKEW_PATHS: usize = 10;

/// Shared flag checked between download chunks
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that flips on the first Ctrl-C
    pub fn on_ctrl_c() -> Self {
        let flag = Self::new();
        let watcher = flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl-C received, cancelling download");
                watcher.cancel();
            }
        });
        flag
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Knobs for a remote download
#[derive(Clone)]
pub struct FetchOptions {
    pub cancel: CancelFlag,
    /// Receives length and position updates; hidden by default
    pub progress: ProgressBar,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cancel: CancelFlag::new(),
            progress: ProgressBar::hidden(),
        }
    }
}

/// Inputs to [`get_binary_path`]
#[derive(Clone)]
pub struct BinaryPathRequest {
    pub artifact_name: String,
    /// Explicit binary; always wins
    pub binary_path_flag: Option<PathBuf>,
    /// Skip every cache and force a fresh build
    pub local_flag: bool,
    pub remote: Option<Arc<dyn RemoteBuildCache>>,
    /// Used only for the fingerprint skew diagnostic
    pub fingerprint: FingerprintOptions,
    pub platform: Option<Platform>,
    pub source_dir: PathBuf,
}

/// Find a binary for `request.artifact_name` without building it.
///
/// `None` tells the caller to run a real build.
pub async fn get_binary_path(
    request: &BinaryPathRequest,
    cache: &LocalBuildCache,
    fetch: &FetchOptions,
) -> Option<PathBuf> {
    if let Some(path) = &request.binary_path_flag {
        debug!("Using binary from --binary-path: {}", path.display());
        return Some(path.clone());
    }

    if request.local_flag {
        debug!("Local build requested, skipping build caches");
        return None;
    }

    if let Some(path) = cache.binary_path(&request.artifact_name) {
        return Some(path);
    }

    let remote = request.remote.as_ref()?;
    match fetch_remote_build(remote.as_ref(), &request.artifact_name, cache, fetch).await {
        Ok(Some(build)) => {
            info!(
                "Downloaded {} from {} to {}",
                build.name,
                remote.name(),
                build.binary_path.display()
            );
            Some(build.binary_path)
        }
        Ok(None) => {
            info!(
                "No cached build {} on {}",
                request.artifact_name,
                remote.name()
            );
            report_fingerprint_skew(request).await;
            None
        }
        Err(RockError::Cancelled) => {
            warn!("Download of {} cancelled", request.artifact_name);
            None
        }
        Err(e) => {
            warn!(
                "Failed to fetch cached build {} from {}: {}",
                request.artifact_name,
                remote.name(),
                e
            );
            if let Some(hint) = e.hint() {
                warn!("{}", hint);
            }
            report_fingerprint_skew(request).await;
            None
        }
    }
}

/// Download, extract and save a remote artifact into the local cache.
///
/// `Ok(None)` on a remote miss and when the downloaded archive holds no
/// recognisable binary. Nothing is left in the cache on failure.
pub async fn fetch_remote_build(
    remote: &dyn RemoteBuildCache,
    artifact_name: &str,
    cache: &LocalBuildCache,
    fetch: &FetchOptions,
) -> RockResult<Option<LocalBuild>> {
    let Some(download) = remote.download(artifact_name).await? else {
        return Ok(None);
    };
    debug!(
        "Downloading {} ({} bytes)",
        download.artifact.name,
        download
            .content_length
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );

    let unwrap_bundles = artifact_platform(artifact_name).map_or(true, |p| p.has_bundle_binary());
    let staging = cache.staging_dir()?;
    let cancel = fetch.cancel.clone();
    let progress = fetch.progress.clone();
    if let Some(length) = download.content_length {
        progress.set_length(length);
    }

    let staging = tokio::task::spawn_blocking(move || -> RockResult<tempfile::TempDir> {
        let archive = staging.path().join(DOWNLOAD_FILE);
        stream_to_file(download.reader, &archive, &cancel, &progress)?;
        progress.finish_and_clear();
        extract_zip(&archive, staging.path())?;
        std::fs::remove_file(&archive)
            .map_err(|e| RockError::io(format!("removing {}", archive.display()), e))?;
        if unwrap_bundles {
            unwrap_bundle_archives(staging.path())?;
        }
        Ok(staging)
    })
    .await
    .map_err(|e| RockError::Internal(format!("download task failed: {}", e)))??;

    match cache.install(artifact_name, staging) {
        Ok(build) => Ok(Some(build)),
        Err(RockError::BinaryNotFound(_)) => {
            warn!(
                "Downloaded artifact {} contains no binary, ignoring it",
                artifact_name
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Copy a download to disk in chunks, checking for cancellation in between
fn stream_to_file(
    mut reader: Box<dyn Read + Send>,
    dest: &Path,
    cancel: &CancelFlag,
    progress: &ProgressBar,
) -> RockResult<u64> {
    let file =
        File::create(dest).map_err(|e| RockError::io(format!("creating {}", dest.display()), e))?;
    let mut writer = BufWriter::new(file);
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(RockError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RockError::io("reading download stream", e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| RockError::io(format!("writing {}", dest.display()), e))?;
        total += n as u64;
        progress.inc(n as u64);
    }

    writer
        .flush()
        .map_err(|e| RockError::io(format!("writing {}", dest.display()), e))?;
    Ok(total)
}

/// Warn about uncommitted files that feed the fingerprint.
///
/// CI fingerprints the committed tree, so local edits to hashed files
/// produce a name no CI run ever uploaded.
async fn report_fingerprint_skew(request: &BinaryPathRequest) {
    let paths = match uncommitted_fingerprint_inputs(
        &request.source_dir,
        request.platform,
        &request.fingerprint,
    )
    .await
    {
        Ok(paths) => paths,
        Err(e) => {
            debug!("Skipping fingerprint diagnostics: {}", e);
            return;
        }
    };
    if paths.is_empty() {
        return;
    }

    let mut listing = paths
        .iter()
        .take(MAX_SKEW_PATHS)
        .map(|p| format!("  {}", p))
        .collect::<Vec<_>>()
        .join("\n");
    if paths.len() > MAX_SKEW_PATHS {
        listing.push_str(&format!("\n  ... and {} more", paths.len() - MAX_SKEW_PATHS));
    }
    warn!(
        "These uncommitted files are not ignored and may be skewing your fingerprint:\n{}",
        listing
    );
}

/// Paths reported by `git status` that the fingerprint ignore rules keep.
///
/// Only paths inside `source_dir` are returned, relative to it. Git reports
/// paths from the repository root, which differs from `source_dir` when the
/// app lives in a subdirectory of a larger repository.
pub async fn uncommitted_fingerprint_inputs(
    source_dir: &Path,
    platform: Option<Platform>,
    options: &FingerprintOptions,
) -> RockResult<Vec<String>> {
    let prefix = git(source_dir, &["rev-parse", "--show-prefix"]).await?;
    let prefix = prefix.trim();
    let status = git(source_dir, &["status", "--porcelain", "--untracked-files=all"]).await?;

    let rules = IgnoreRules::new(source_dir, &options.ignore_patterns(platform))?;
    Ok(parse_porcelain(&status)
        .into_iter()
        .filter_map(|path| path.strip_prefix(prefix).map(str::to_string))
        .filter(|path| !path.is_empty())
        .filter(|path| !rules.is_ignored(Path::new(path), path.ends_with('/')))
        .collect())
}

/// Run git in `dir` and return its stdout
async fn git(dir: &Path, args: &[&str]) -> RockResult<String> {
    let command = format!("git {}", args.join(" "));
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| RockError::command_failed(command, e))?;
    if !output.status.success() {
        return Err(RockError::User(format!(
            "{} is not a git repository",
            dir.display()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract paths from `git status --porcelain` (v1) output
fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            // Renames are reported as `old -> new`
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            path.trim_matches('"').to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::archive::pack_artifact;
    use crate::remote::{
        DeleteRequest, ListRequest, RemoteArtifact, RemoteDownload, UploadRequest,
    };
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory remote serving one zip, or failing
    struct FakeRemote {
        archive: Option<Vec<u8>>,
        fail: bool,
        downloads: Mutex<usize>,
    }

    impl FakeRemote {
        fn serving(archive: Vec<u8>) -> Self {
            Self {
                archive: Some(archive),
                fail: false,
                downloads: Mutex::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                archive: None,
                fail: false,
                downloads: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                archive: None,
                fail: true,
                downloads: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteBuildCache for FakeRemote {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list(&self, _request: ListRequest) -> RockResult<Vec<RemoteArtifact>> {
            Ok(vec![])
        }

        async fn download(&self, artifact_name: &str) -> RockResult<Option<RemoteDownload>> {
            *self.downloads.lock().unwrap() += 1;
            if self.fail {
                return Err(RockError::remote_auth("fake", "token expired"));
            }
            Ok(self.archive.clone().map(|bytes| RemoteDownload {
                artifact: RemoteArtifact {
                    name: artifact_name.to_string(),
                    url: "mem://".to_string(),
                    id: None,
                    size_in_bytes: Some(bytes.len() as u64),
                    created_at: None,
                },
                content_length: Some(bytes.len() as u64),
                reader: Box::new(io::Cursor::new(bytes)),
            }))
        }

        async fn upload(&self, _request: UploadRequest) -> RockResult<RemoteArtifact> {
            Err(RockError::UnsupportedOperation {
                provider: "fake".to_string(),
                operation: "upload",
            })
        }

        async fn delete(&self, _request: DeleteRequest) -> RockResult<Vec<RemoteArtifact>> {
            Ok(vec![])
        }
    }

    fn packed(dir: &Path, binary: &Path) -> Vec<u8> {
        let zip = dir.join("packed.zip");
        pack_artifact(binary, &zip).unwrap();
        fs::read(zip).unwrap()
    }

    fn request(dir: &Path, remote: Option<Arc<dyn RemoteBuildCache>>) -> BinaryPathRequest {
        BinaryPathRequest {
            artifact_name: "rock-android-debug-abc".to_string(),
            binary_path_flag: None,
            local_flag: false,
            remote,
            fingerprint: FingerprintOptions::default(),
            platform: Some(Platform::Android),
            source_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn binary_path_flag_wins() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let apk = dir.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        cache.save("rock-android-debug-abc", &apk).await.unwrap();

        let mut req = request(dir.path(), None);
        req.binary_path_flag = Some(PathBuf::from("/custom/app.apk"));

        let path = get_binary_path(&req, &cache, &FetchOptions::default()).await;
        assert_eq!(path, Some(PathBuf::from("/custom/app.apk")));
    }

    #[tokio::test]
    async fn local_hit_skips_remote() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let apk = dir.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        cache.save("rock-android-debug-abc", &apk).await.unwrap();
        let remote = Arc::new(FakeRemote::failing());

        let req = request(dir.path(), Some(remote.clone()));
        let path = get_binary_path(&req, &cache, &FetchOptions::default())
            .await
            .unwrap();

        assert!(path.ends_with("rock-android-debug-abc/app.apk"));
        assert_eq!(*remote.downloads.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn local_flag_forces_build() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let apk = dir.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        cache.save("rock-android-debug-abc", &apk).await.unwrap();

        let mut req = request(dir.path(), None);
        req.local_flag = true;

        assert!(get_binary_path(&req, &cache, &FetchOptions::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn remote_hit_is_materialized_locally() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let apk = dir.path().join("app-debug.apk");
        fs::write(&apk, "remote apk").unwrap();
        let remote = Arc::new(FakeRemote::serving(packed(dir.path(), &apk)));

        let req = request(dir.path(), Some(remote));
        let path = get_binary_path(&req, &cache, &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"remote apk");
        assert_eq!(
            cache.query("rock-android-debug-abc").unwrap().binary_path,
            path
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn remote_app_bundle_is_unwrapped() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let app = dir.path().join("HelloWorld.app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("HelloWorld"), "exe").unwrap();
        let remote = Arc::new(FakeRemote::serving(packed(dir.path(), &app)));

        let mut req = request(dir.path(), Some(remote));
        req.artifact_name = "rock-ios-simulator-Debug-abc".to_string();
        let path = get_binary_path(&req, &cache, &FetchOptions::default())
            .await
            .unwrap();

        assert!(path.ends_with("HelloWorld.app"));
        assert!(path.join("HelloWorld").is_file());
        assert!(!path.parent().unwrap().join("app.tar.gz").exists());
    }

    #[tokio::test]
    async fn remote_failure_falls_through() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let req = request(dir.path(), Some(Arc::new(FakeRemote::failing())));

        assert!(get_binary_path(&req, &cache, &FetchOptions::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn remote_miss_falls_through() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let req = request(dir.path(), Some(Arc::new(FakeRemote::empty())));

        assert!(get_binary_path(&req, &cache, &FetchOptions::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn archive_without_binary_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let readme = dir.path().join("README.md");
        fs::write(&readme, "no binary here").unwrap();
        let remote = Arc::new(FakeRemote::serving(packed(dir.path(), &readme)));

        let result = fetch_remote_build(
            remote.as_ref(),
            "rock-android-debug-abc",
            &cache,
            &FetchOptions::default(),
        )
        .await
        .unwrap();

        assert!(result.is_none());
        assert!(cache.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(cache.builds_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cancelled_download_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let apk = dir.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        let remote = Arc::new(FakeRemote::serving(packed(dir.path(), &apk)));
        let fetch = FetchOptions::default();
        fetch.cancel.cancel();

        let err = fetch_remote_build(remote.as_ref(), "rock-android-x", &cache, &fetch)
            .await
            .unwrap_err();

        assert!(matches!(err, RockError::Cancelled));
        assert_eq!(fs::read_dir(cache.builds_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_reports_progress() {
        let dir = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(dir.path().join("cache"));
        let apk = dir.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        let bytes = packed(dir.path(), &apk);
        let expected = bytes.len() as u64;
        let remote = Arc::new(FakeRemote::serving(bytes));
        let fetch = FetchOptions::default();

        fetch_remote_build(remote.as_ref(), "rock-android-x", &cache, &fetch)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetch.progress.length(), Some(expected));
        assert_eq!(fetch.progress.position(), expected);
    }

    #[test]
    fn porcelain_parsing() {
        let out = " M android/app/build.gradle\n?? ios/NewFile.swift\nR  old.js -> src/new.js\n?? \"with space.txt\"\n";
        assert_eq!(
            parse_porcelain(out),
            vec![
                "android/app/build.gradle",
                "ios/NewFile.swift",
                "src/new.js",
                "with space.txt"
            ]
        );
    }

    #[tokio::test]
    async fn skew_report_is_scoped_to_nested_project() {
        let repo = TempDir::new().unwrap();
        let init = std::process::Command::new("git")
            .arg("init")
            .arg("-q")
            .current_dir(repo.path())
            .status();
        if !matches!(init, Ok(status) if status.success()) {
            eprintln!("git not available, skipping");
            return;
        }
        let project = repo.path().join("apps/mobile");
        fs::create_dir_all(project.join("android/build")).unwrap();
        fs::create_dir_all(project.join("android/app")).unwrap();
        fs::write(repo.path().join("README.md"), "monorepo").unwrap();
        fs::write(project.join("android/build/out.apk"), "apk").unwrap();
        fs::write(project.join("android/app/build.gradle"), "android {}").unwrap();

        let paths = uncommitted_fingerprint_inputs(
            &project,
            Some(Platform::Android),
            &FingerprintOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(paths, vec!["android/app/build.gradle"]);
    }
}
