//! Fingerprint engine
//!
//! Turns a list of [`HashSource`]s into a single SHA-256 digest. Sources are
//! sorted and de-duplicated first, so the result does not depend on the order
//! in which enumerators produced them. Only file contents and root-relative
//! identifiers reach the digest: no timestamps, hostnames or absolute paths.

use crate::error::{RockError, RockResult};
use crate::fingerprint::source::{normalize_rel_path, Fingerprint, HashSource};
use crate::fingerprint::walk::{ordered_files, EntryKind, IgnoreRules, WalkEntry, WalkOptions};
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Read buffer used when streaming files into the hasher
const READ_CHUNK: usize = 64 * 1024;

/// Files hashed concurrently inside one directory source
const DIR_FILE_CONCURRENCY: usize = 8;

/// Reason attached to sources derived from environment variables
pub const ENV_REASON: &str = "env";

/// Values of the environment variables that take part in a fingerprint.
///
/// Captured once up front so the engine itself never reads process state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    values: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Read `names` from the process environment. Unset variables become
    /// empty strings so the source set keeps the same shape.
    pub fn capture<S: AsRef<str>>(names: &[S]) -> Self {
        Self::from_pairs(names.iter().map(|name| {
            let name = name.as_ref();
            (name.to_string(), std::env::var(name).unwrap_or_default())
        }))
    }

    /// Build a snapshot from explicit values
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// One `contents` source per variable, keyed by the variable name
    pub fn to_sources(&self) -> Vec<HashSource> {
        self.values
            .iter()
            .map(|(name, value)| HashSource::contents(name.clone(), value.clone(), ENV_REASON))
            .collect()
    }
}

/// Lowercase hex SHA-256 of bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes fingerprints for a single project root
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    root: PathBuf,
    rules: IgnoreRules,
    walk: WalkOptions,
    concurrency: usize,
}

impl FingerprintEngine {
    /// Create an engine for `root`. The root must exist.
    pub fn new(root: &Path) -> RockResult<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| RockError::io(format!("resolving project root {}", root.display()), e))?;
        Ok(Self {
            root,
            rules: IgnoreRules::empty(),
            walk: WalkOptions::default(),
            concurrency: 16,
        })
    }

    /// Exclude paths matching `rules`
    pub fn with_ignore_rules(mut self, rules: IgnoreRules) -> Self {
        self.rules = rules;
        self
    }

    /// Override traversal options for directory sources
    pub fn with_walk_options(mut self, walk: WalkOptions) -> Self {
        self.walk = walk;
        self
    }

    /// Number of sources hashed concurrently
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Canonical project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the fingerprint of `sources` plus the captured environment.
    ///
    /// Missing or unreadable files are logged and left out of `inputs`;
    /// they never abort the computation.
    pub async fn compute(&self, sources: Vec<HashSource>, env: &EnvSnapshot) -> Fingerprint {
        let mut all: Vec<HashSource> = sources
            .into_iter()
            .filter_map(|source| self.root_relative(source))
            .collect();
        all.extend(env.to_sources());
        let sorted = normalize_sources(all);

        let mut hashed: Vec<(usize, HashSource)> = stream::iter(sorted.into_iter().enumerate())
            .map(|(index, mut source)| async move {
                let digest = self.hash_source(&source).await?;
                source.set_hash(digest);
                Some((index, source))
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|item| async move { item })
            .collect()
            .await;
        hashed.sort_by_key(|(index, _)| *index);

        let inputs: Vec<HashSource> = hashed.into_iter().map(|(_, source)| source).collect();
        let hash = combine_digests(&inputs);
        debug!("Fingerprint {} over {} sources", hash, inputs.len());

        Fingerprint { hash, inputs }
    }

    /// Rewrite an absolute file or dir path to its form relative to the root.
    ///
    /// Paths outside the root are dropped with a warning, since their location
    /// would otherwise leak into the digest.
    fn root_relative(&self, mut source: HashSource) -> Option<HashSource> {
        let path = match &source {
            HashSource::File { file_path, .. } | HashSource::Dir { file_path, .. } => {
                PathBuf::from(file_path)
            }
            HashSource::Contents { .. } => return Some(source),
        };
        if !path.is_absolute() {
            return Some(source);
        }

        let Some(rel) = self.strip_root(&path) else {
            warn!(
                "Skipping {} source {}: outside project root {}",
                source.kind(),
                path.display(),
                self.root.display()
            );
            return None;
        };
        if let HashSource::File { file_path, .. } | HashSource::Dir { file_path, .. } = &mut source {
            *file_path = normalize_rel_path(&rel.to_string_lossy());
        }
        Some(source)
    }

    fn strip_root(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return Some(rel.to_path_buf());
        }
        // The root is canonical; resolve only the parent so the source itself
        // is never followed
        let parent = path.parent()?.canonicalize().ok()?;
        let resolved = match path.file_name() {
            Some(name) => parent.join(name),
            None => parent,
        };
        resolved.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }

    async fn hash_source(&self, source: &HashSource) -> Option<String> {
        match source {
            HashSource::Contents { contents, .. } => Some(sha256_hex(contents.as_bytes())),
            HashSource::File { file_path, .. } | HashSource::Dir { file_path, .. } => {
                if self.rules.is_ignored(Path::new(file_path), matches!(source, HashSource::Dir { .. })) {
                    debug!("Skipping ignored source {}", file_path);
                    return None;
                }
                match self.hash_path(file_path).await {
                    Ok(digest) => Some(digest),
                    Err(err) => {
                        warn!(
                            "Skipping {} source {} ({}): {}",
                            source.kind(),
                            file_path,
                            source.reasons().join(", "),
                            err
                        );
                        None
                    }
                }
            }
        }
    }

    /// Hash whatever lives at `rel` (file, directory or symlink)
    async fn hash_path(&self, rel: &str) -> std::io::Result<String> {
        let abs = if rel == "." {
            self.root.clone()
        } else {
            self.root.join(rel)
        };
        let meta = tokio::fs::symlink_metadata(&abs).await?;
        if meta.file_type().is_symlink() {
            hash_symlink(&abs).await
        } else if meta.is_dir() {
            self.hash_dir(rel).await
        } else {
            hash_file(&abs).await
        }
    }

    /// Digest of the `(relative path, file digest)` sequence below `rel`
    async fn hash_dir(&self, rel: &str) -> std::io::Result<String> {
        let root = self.root.clone();
        let dir = rel.to_string();
        let rules = self.rules.clone();
        let walk = self.walk.clone();
        let entries = tokio::task::spawn_blocking(move || ordered_files(&root, &dir, &rules, &walk))
            .await
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;

        let digests: Vec<Option<(String, String)>> = stream::iter(entries)
            .map(|entry| async move {
                match hash_entry(&entry).await {
                    Ok(digest) => Some((entry.rel_path, digest)),
                    Err(err) => {
                        warn!("Skipping {} while hashing directory: {}", entry.abs_path.display(), err);
                        None
                    }
                }
            })
            .buffered(DIR_FILE_CONCURRENCY)
            .collect()
            .await;

        let mut hasher = Sha256::new();
        for (path, digest) in digests.into_iter().flatten() {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Sort sources deterministically and merge duplicates
pub fn normalize_sources(mut sources: Vec<HashSource>) -> Vec<HashSource> {
    sources.sort_by(HashSource::sort_key_cmp);
    let mut merged: Vec<HashSource> = Vec::with_capacity(sources.len());
    for source in sources {
        match merged.last_mut() {
            Some(last) if last.same_input(&source) => last.absorb_reasons(&source),
            _ => merged.push(source),
        }
    }
    merged
}

/// Final digest over already-hashed, sorted sources
pub fn combine_digests(inputs: &[HashSource]) -> String {
    let mut hasher = Sha256::new();
    for source in inputs {
        let Some(digest) = source.hash() else {
            continue;
        };
        hasher.update(source.kind().as_bytes());
        hasher.update([0u8]);
        hasher.update(source.identifier().as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Stream a file through SHA-256 without loading it into memory
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Symlinks hash as their target text, never as the target's contents
pub async fn hash_symlink(path: &Path) -> std::io::Result<String> {
    let target = tokio::fs::read_link(path).await?;
    let text = target.to_string_lossy().replace('\\', "/");
    Ok(sha256_hex(format!("symlink:{}", text).as_bytes()))
}

async fn hash_entry(entry: &WalkEntry) -> std::io::Result<String> {
    match entry.kind {
        EntryKind::File => hash_file(&entry.abs_path).await,
        EntryKind::Symlink => hash_symlink(&entry.abs_path).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, FingerprintEngine) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("ios")).unwrap();
        fs::write(dir.path().join("ios/Podfile"), "platform :ios, '15.1'\n").unwrap();
        fs::create_dir_all(dir.path().join("android/app")).unwrap();
        fs::write(dir.path().join("android/build.gradle"), "buildscript {}\n").unwrap();
        fs::write(dir.path().join("android/app/build.gradle"), "android {}\n").unwrap();
        let engine = FingerprintEngine::new(dir.path()).unwrap();
        (dir, engine)
    }

    fn scenario_sources() -> Vec<HashSource> {
        vec![
            HashSource::file("ios/Podfile", "native-deps"),
            HashSource::contents("RCT_NEW_ARCH_ENABLED", "1", "env"),
        ]
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn stable_across_calls() {
        let (_dir, engine) = project();
        let env = EnvSnapshot::default();

        let first = engine.compute(scenario_sources(), &env).await;
        let second = engine.compute(scenario_sources(), &env).await;

        assert_eq!(first.hash, second.hash);
        assert_eq!(first.hash.len(), 64);
        assert_eq!(first.inputs.len(), 2);
        assert!(first.inputs.iter().all(|s| s.hash().is_some()));
    }

    #[tokio::test]
    async fn changes_when_file_changes() {
        let (dir, engine) = project();
        let env = EnvSnapshot::default();

        let before = engine.compute(scenario_sources(), &env).await;
        fs::write(dir.path().join("ios/Podfile"), "platform :ios, '16.0'\n").unwrap();
        let after = engine.compute(scenario_sources(), &env).await;

        assert_ne!(before.hash, after.hash);
    }

    #[tokio::test]
    async fn order_independent() {
        let (_dir, engine) = project();
        let env = EnvSnapshot::default();
        let sources = vec![
            HashSource::dir("android", "bare"),
            HashSource::file("ios/Podfile", "native-deps"),
            HashSource::contents("native-modules", "", "autolinking"),
        ];
        let mut reversed = sources.clone();
        reversed.reverse();

        let a = engine.compute(sources, &env).await;
        let b = engine.compute(reversed, &env).await;

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.inputs, b.inputs);
    }

    #[tokio::test]
    async fn dir_hash_sees_nested_changes() {
        let (dir, engine) = project();
        let env = EnvSnapshot::default();
        let sources = vec![HashSource::dir("android", "bare")];

        let before = engine.compute(sources.clone(), &env).await;
        fs::write(dir.path().join("android/app/build.gradle"), "android { }\n").unwrap();
        let after = engine.compute(sources, &env).await;

        assert_ne!(before.hash, after.hash);
    }

    #[tokio::test]
    async fn dir_hash_respects_ignore_rules() {
        let (dir, engine) = project();
        let rules = IgnoreRules::new(engine.root(), &["android/app/build/"]).unwrap();
        let engine = engine.with_ignore_rules(rules);
        let env = EnvSnapshot::default();
        let sources = vec![HashSource::dir("android", "bare")];

        let before = engine.compute(sources.clone(), &env).await;
        fs::create_dir_all(dir.path().join("android/app/build")).unwrap();
        fs::write(dir.path().join("android/app/build/output.apk"), "binary").unwrap();
        let after = engine.compute(sources, &env).await;

        assert_eq!(before.hash, after.hash);
    }

    #[tokio::test]
    async fn missing_file_is_skipped() {
        let (_dir, engine) = project();
        let env = EnvSnapshot::default();

        let with_missing = engine
            .compute(
                vec![
                    HashSource::file("ios/Podfile", "native-deps"),
                    HashSource::file("ios/Podfile.lock", "native-deps"),
                ],
                &env,
            )
            .await;
        let without = engine
            .compute(vec![HashSource::file("ios/Podfile", "native-deps")], &env)
            .await;

        assert_eq!(with_missing.inputs.len(), 1);
        assert_eq!(with_missing.hash, without.hash);
    }

    #[tokio::test]
    async fn duplicates_merge_reasons() {
        let (_dir, engine) = project();
        let fingerprint = engine
            .compute(
                vec![
                    HashSource::file("ios/Podfile", "native-deps"),
                    HashSource::file("./ios/Podfile", "extra"),
                ],
                &EnvSnapshot::default(),
            )
            .await;

        assert_eq!(fingerprint.inputs.len(), 1);
        assert_eq!(
            fingerprint.inputs[0].reasons(),
            ["native-deps".to_string(), "extra".to_string()]
        );
    }

    #[tokio::test]
    async fn env_values_are_hashed() {
        let (_dir, engine) = project();
        let sources = vec![HashSource::file("ios/Podfile", "native-deps")];

        let on = EnvSnapshot::from_pairs([("RCT_NEW_ARCH_ENABLED", "1")]);
        let off = EnvSnapshot::from_pairs([("RCT_NEW_ARCH_ENABLED", "0")]);
        let unset = EnvSnapshot::from_pairs([("RCT_NEW_ARCH_ENABLED", "")]);

        let a = engine.compute(sources.clone(), &on).await;
        let b = engine.compute(sources.clone(), &off).await;
        let c = engine.compute(sources, &unset).await;

        assert_ne!(a.hash, b.hash);
        assert_ne!(b.hash, c.hash);
        assert_eq!(c.inputs.len(), 2);
    }

    #[test]
    #[serial_test::serial]
    fn capture_only_reads_listed_variables() {
        std::env::set_var("ROCK_TEST_LISTED", "yes");
        std::env::set_var("ROCK_TEST_UNLISTED", "no");
        std::env::remove_var("ROCK_TEST_UNSET");

        let snapshot = EnvSnapshot::capture(&["ROCK_TEST_LISTED", "ROCK_TEST_UNSET"]);
        let sources = snapshot.to_sources();

        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0],
            HashSource::contents("ROCK_TEST_LISTED", "yes", ENV_REASON)
        );
        assert_eq!(
            sources[1],
            HashSource::contents("ROCK_TEST_UNSET", "", ENV_REASON)
        );

        std::env::remove_var("ROCK_TEST_LISTED");
        std::env::remove_var("ROCK_TEST_UNLISTED");
    }

    #[tokio::test]
    async fn absolute_paths_do_not_leak_into_hash() {
        let (a_dir, a) = project();
        let (b_dir, b) = project();
        let env = EnvSnapshot::default();
        let sources = |root: &Path| {
            vec![
                HashSource::file(root.join("ios/Podfile").to_string_lossy(), "native-deps"),
                HashSource::dir(root.join("android").to_string_lossy(), "bare"),
            ]
        };

        let first = a.compute(sources(a_dir.path()), &env).await;
        let second = b.compute(sources(b_dir.path()), &env).await;
        let relative = a
            .compute(
                vec![
                    HashSource::file("ios/Podfile", "native-deps"),
                    HashSource::dir("android", "bare"),
                ],
                &env,
            )
            .await;

        assert_eq!(first.hash, second.hash);
        assert_eq!(first.hash, relative.hash);
        assert!(first.inputs.iter().any(|s| s.identifier() == "ios/Podfile"));
        assert!(first.inputs.iter().any(|s| s.identifier() == "android"));
    }

    #[tokio::test]
    async fn absolute_path_outside_root_is_skipped() {
        let (_dir, engine) = project();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("Podfile"), "elsewhere").unwrap();

        let fingerprint = engine
            .compute(
                vec![HashSource::file(
                    outside.path().join("Podfile").to_string_lossy(),
                    "extra",
                )],
                &EnvSnapshot::default(),
            )
            .await;

        assert!(fingerprint.inputs.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_hashes_target_text() {
        let (dir, engine) = project();
        std::os::unix::fs::symlink("Podfile", dir.path().join("ios/Podfile.link")).unwrap();
        let env = EnvSnapshot::default();
        let sources = vec![HashSource::file("ios/Podfile.link", "extra")];

        let before = engine.compute(sources.clone(), &env).await;
        fs::write(dir.path().join("ios/Podfile"), "changed").unwrap();
        let after = engine.compute(sources, &env).await;

        assert_eq!(before.hash, after.hash);
        assert_eq!(
            before.inputs[0].hash().unwrap(),
            sha256_hex(b"symlink:Podfile")
        );
    }
}
