//! Ordered file enumeration
//!
//! Directory listing order is filesystem dependent, so every traversal that
//! feeds a digest goes through [`ordered_files`], which returns a sorted,
//! de-duplicated list of relative paths. Symlinks are reported as such and
//! never followed.

use crate::error::{RockError, RockResult};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Gitignore-style patterns evaluated relative to the project root
#[derive(Clone)]
pub struct IgnoreRules {
    matcher: Arc<Gitignore>,
}

impl IgnoreRules {
    /// Compile `patterns` rooted at `root`
    pub fn new<S: AsRef<str>>(root: &Path, patterns: &[S]) -> RockResult<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder
                .add_line(None, pattern)
                .map_err(|e| RockError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
        }
        let matcher = builder.build().map_err(|e| RockError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            reason: e.to_string(),
        })?;
        Ok(Self {
            matcher: Arc::new(matcher),
        })
    }

    /// Rules that ignore nothing
    pub fn empty() -> Self {
        Self {
            matcher: Arc::new(Gitignore::empty()),
        }
    }

    /// Check a path relative to the project root
    pub fn is_ignored(&self, rel_path: &Path, is_dir: bool) -> bool {
        if rel_path.as_os_str().is_empty() || rel_path.has_root() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }
}

impl std::fmt::Debug for IgnoreRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreRules")
            .field("patterns", &self.matcher.num_ignores())
            .finish()
    }
}

/// Kind of a walked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
}

/// A file (or symlink) found below a walked directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walked directory, `/` separated
    pub rel_path: String,
    /// Absolute path on disk
    pub abs_path: PathBuf,
    pub kind: EntryKind,
}

/// Options for a single traversal
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Honour `.gitignore` files found inside the walked tree and at the root
    pub respect_gitignore: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
        }
    }
}

/// List every file below `root/dir_rel`, sorted by relative path.
///
/// `root` must be absolute. Unreadable entries are logged and skipped.
pub fn ordered_files(
    root: &Path,
    dir_rel: &str,
    rules: &IgnoreRules,
    options: &WalkOptions,
) -> Vec<WalkEntry> {
    let base = if dir_rel == "." {
        root.to_path_buf()
    } else {
        root.join(dir_rel)
    };

    let mut builder = WalkBuilder::new(&base);
    builder
        .standard_filters(false)
        .hidden(false)
        .parents(false)
        .ignore(false)
        .git_global(false)
        .git_exclude(false)
        .git_ignore(options.respect_gitignore)
        .require_git(false)
        .follow_links(false);

    if options.respect_gitignore {
        let root_gitignore = root.join(".gitignore");
        if root_gitignore.is_file() {
            if let Some(err) = builder.add_ignore(&root_gitignore) {
                warn!("Ignoring unreadable {}: {}", root_gitignore.display(), err);
            }
        }
    }

    let filter_rules = rules.clone();
    let filter_root = root.to_path_buf();
    builder.filter_entry(move |entry| {
        let Ok(rel) = entry.path().strip_prefix(&filter_root) else {
            return true;
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        !filter_rules.is_ignored(rel, is_dir)
    });

    let mut entries = Vec::new();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", base.display(), err);
                continue;
            }
        };
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        let Ok(rel) = entry.path().strip_prefix(&base) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            // The walked path is itself a file or link
            continue;
        }
        entries.push(WalkEntry {
            rel_path: to_slash(rel),
            abs_path: entry.path().to_path_buf(),
            kind,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    entries.dedup_by(|a, b| a.rel_path == b.rel_path);
    debug!("Enumerated {} files under {}", entries.len(), base.display());
    entries
}

/// Directories never descended into when expanding glob sources
const GLOB_SKIP_DIRS: &[&str] = &["node_modules", ".git"];

/// Expand glob `patterns` against the project tree.
///
/// Returns sorted root-relative file paths. Globs do not descend into
/// `node_modules` or `.git`.
pub fn glob_files<S: AsRef<str>>(
    root: &Path,
    patterns: &[S],
    options: &WalkOptions,
) -> RockResult<Vec<String>> {
    let mut overrides = OverrideBuilder::new(root);
    for pattern in patterns {
        let pattern = pattern.as_ref();
        overrides
            .add(pattern)
            .map_err(|e| RockError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
    }
    let overrides = overrides.build().map_err(|e| RockError::InvalidPattern {
        pattern: String::new(),
        reason: e.to_string(),
    })?;

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .hidden(false)
        .parents(false)
        .ignore(false)
        .git_global(false)
        .git_exclude(false)
        .git_ignore(options.respect_gitignore)
        .require_git(false)
        .follow_links(false)
        .overrides(overrides)
        .filter_entry(|entry| {
            !GLOB_SKIP_DIRS
                .iter()
                .any(|skip| entry.file_name() == *skip)
        });

    let mut paths: Vec<String> = builder
        .build()
        .filter_map(|result| result.ok())
        .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(to_slash))
        .filter(|rel| !rel.is_empty())
        .collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Render a relative path with `/` separators
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
