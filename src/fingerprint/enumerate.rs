//! Source enumerators
//!
//! Each enumerator inspects the project and reports the [`HashSource`]s that
//! can affect a native build. They run concurrently; a failing enumerator is
//! logged and contributes nothing instead of aborting the fingerprint.

use crate::error::{RockError, RockResult};
use crate::fingerprint::source::{normalize_rel_path, HashSource};
use crate::fingerprint::walk::{glob_files, WalkOptions};
use crate::fingerprint::FingerprintOptions;
use crate::platform::Platform;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Project configuration files that influence native builds
const CONFIG_FILES: &[(&str, &str)] = &[
    ("rock.toml", "rock-config"),
    ("react-native.config.js", "rn-cli-config"),
    ("react-native.config.ts", "rn-cli-config"),
];

/// patch-package output
const PATCHES_DIR: &str = "patches";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
}

/// Collect every source for `platform`, or only the platform-independent
/// ("bare") sources when `platform` is `None`.
///
/// `root` must be the canonical project root.
pub async fn collect_sources(
    root: &Path,
    platform: Option<Platform>,
    options: &FingerprintOptions,
) -> Vec<HashSource> {
    let walk = WalkOptions {
        respect_gitignore: options.respect_gitignore,
    };

    let (config, patches, native_dir, modules, extra) = tokio::join!(
        config_sources(root),
        patches_sources(root),
        native_project_sources(root, platform),
        native_module_sources(root, platform),
        extra_sources(root, &options.extra_sources, &walk),
    );

    let mut sources = Vec::new();
    for (name, result) in [
        ("config", config),
        ("patches", patches),
        ("native-project", native_dir),
        ("native-modules", modules),
        ("extra-sources", extra),
    ] {
        match result {
            Ok(found) => {
                debug!("Enumerator {} produced {} sources", name, found.len());
                sources.extend(found);
            }
            Err(err) => warn!("Source enumerator {} failed, continuing without it: {}", name, err),
        }
    }
    sources
}

async fn config_sources(root: &Path) -> RockResult<Vec<HashSource>> {
    let mut sources = Vec::new();
    for (file, reason) in CONFIG_FILES {
        if fs::metadata(root.join(file)).await.is_ok() {
            sources.push(HashSource::file(*file, *reason));
        }
    }
    Ok(sources)
}

async fn patches_sources(root: &Path) -> RockResult<Vec<HashSource>> {
    match fs::metadata(root.join(PATCHES_DIR)).await {
        Ok(meta) if meta.is_dir() => Ok(vec![HashSource::dir(PATCHES_DIR, "patches")]),
        _ => Ok(vec![]),
    }
}

async fn native_project_sources(
    root: &Path,
    platform: Option<Platform>,
) -> RockResult<Vec<HashSource>> {
    let Some(platform) = platform else {
        return Ok(vec![]);
    };
    let dir = platform.project_dir();
    match fs::metadata(root.join(dir)).await {
        Ok(meta) if meta.is_dir() => Ok(vec![HashSource::dir(
            dir,
            format!("bare-{}-dir", platform),
        )]),
        _ => {
            debug!("No {} directory in project", dir);
            Ok(vec![])
        }
    }
}

/// Autolinked native modules: dependencies that ship a native directory
/// for `platform`.
async fn native_module_sources(
    root: &Path,
    platform: Option<Platform>,
) -> RockResult<Vec<HashSource>> {
    let Some(platform) = platform else {
        return Ok(vec![]);
    };
    let manifest_path = root.join("package.json");
    let manifest = match fs::read_to_string(&manifest_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(RockError::io(format!("reading {}", manifest_path.display()), e)),
    };
    let package: PackageJson = serde_json::from_str(&manifest)?;

    let reason = format!("rn-autolinking-{}", platform);
    let mut sources = Vec::new();
    let mut modules = Vec::new();

    let names = package
        .dependencies
        .keys()
        .chain(package.dev_dependencies.keys());
    for name in names {
        if !is_safe_package_name(name) {
            warn!("Ignoring dependency with unexpected name: {}", name);
            continue;
        }
        let package_rel = format!("node_modules/{}", name);
        let package_dir = root.join(&package_rel);
        let native_rel = format!("{}/{}", package_rel, platform.project_dir());

        let has_native_dir = fs::metadata(root.join(&native_rel))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let podspecs = if platform == Platform::Ios {
            podspec_files(&package_dir).await
        } else {
            vec![]
        };
        if !has_native_dir && podspecs.is_empty() {
            continue;
        }

        if has_native_dir {
            sources.push(HashSource::dir(native_rel, reason.clone()));
        }
        for podspec in podspecs {
            sources.push(HashSource::file(
                format!("{}/{}", package_rel, podspec),
                reason.clone(),
            ));
        }
        let version = installed_version(&package_dir).await.unwrap_or_default();
        modules.push(format!("{}@{}", name, version));
    }

    modules.sort();
    modules.dedup();
    if !modules.is_empty() {
        sources.push(HashSource::contents(
            format!("native-modules:{}", platform),
            modules.join("\n"),
            reason,
        ));
    }
    Ok(sources)
}

/// `*.podspec` files at the top of a package
async fn podspec_files(package_dir: &Path) -> Vec<String> {
    let Ok(mut entries) = fs::read_dir(package_dir).await else {
        return vec![];
    };
    let mut podspecs = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".podspec") {
            podspecs.push(name);
        }
    }
    podspecs.sort();
    podspecs
}

async fn installed_version(package_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(package_dir.join("package.json")).await.ok()?;
    let package: PackageJson = serde_json::from_str(&content).ok()?;
    package.version
}

fn is_safe_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('\\')
        && !name.starts_with('/')
        && name.matches('/').count() <= usize::from(name.starts_with('@'))
}

async fn extra_sources(
    root: &Path,
    entries: &[String],
    walk: &WalkOptions,
) -> RockResult<Vec<HashSource>> {
    let mut sources = Vec::new();
    let mut globs = Vec::new();

    for entry in entries {
        if is_glob(entry) {
            globs.push(entry.clone());
            continue;
        }
        let rel = normalize_rel_path(entry);
        if Path::new(&rel).is_absolute() || rel.split('/').any(|part| part == "..") {
            warn!("Extra source {} must be inside the project, skipping", entry);
            continue;
        }
        match fs::symlink_metadata(root.join(&rel)).await {
            Ok(meta) if meta.is_dir() => sources.push(HashSource::dir(rel, "extra-source")),
            Ok(_) => sources.push(HashSource::file(rel, "extra-source")),
            Err(_) => warn!("Extra source {} does not exist, skipping", entry),
        }
    }

    if !globs.is_empty() {
        let root = root.to_path_buf();
        let walk = walk.clone();
        let matched = tokio::task::spawn_blocking(move || glob_files(&root, &globs, &walk))
            .await
            .map_err(|e| RockError::Internal(format!("glob expansion panicked: {}", e)))??;
        sources.extend(
            matched
                .into_iter()
                .map(|path| HashSource::file(path, "extra-source")),
        );
    }

    Ok(sources)
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '[', '{'])
}
