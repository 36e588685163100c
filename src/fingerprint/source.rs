//! Hash sources and the fingerprint built from them

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One input that can influence the outcome of a native build.
///
/// Paths are relative to the project root and always use `/` separators so
/// the same project hashes identically on every machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HashSource {
    /// A single file, hashed by content
    File {
        #[serde(rename = "filePath")]
        file_path: String,
        reasons: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    /// A directory, hashed over every file below it
    Dir {
        #[serde(rename = "filePath")]
        file_path: String,
        reasons: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    /// A literal string; `id` is a label, not a path
    Contents {
        id: String,
        contents: String,
        reasons: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
}

impl HashSource {
    /// File source
    pub fn file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::File {
            file_path: normalize_rel_path(&path.into()),
            reasons: vec![reason.into()],
            hash: None,
        }
    }

    /// Directory source
    pub fn dir(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dir {
            file_path: normalize_rel_path(&path.into()),
            reasons: vec![reason.into()],
            hash: None,
        }
    }

    /// Literal contents source
    pub fn contents(
        id: impl Into<String>,
        contents: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Contents {
            id: id.into(),
            contents: contents.into(),
            reasons: vec![reason.into()],
            hash: None,
        }
    }

    /// Discriminant used as the primary sort key
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Dir { .. } => "dir",
            Self::Contents { .. } => "contents",
        }
    }

    /// Path for file/dir sources, label for contents sources
    pub fn identifier(&self) -> &str {
        match self {
            Self::File { file_path, .. } | Self::Dir { file_path, .. } => file_path,
            Self::Contents { id, .. } => id,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Self::File { reasons, .. } | Self::Dir { reasons, .. } | Self::Contents { reasons, .. } => {
                reasons
            }
        }
    }

    fn reasons_mut(&mut self) -> &mut Vec<String> {
        match self {
            Self::File { reasons, .. } | Self::Dir { reasons, .. } | Self::Contents { reasons, .. } => {
                reasons
            }
        }
    }

    /// Resolved digest, once the engine has processed this source
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::File { hash, .. } | Self::Dir { hash, .. } | Self::Contents { hash, .. } => {
                hash.as_deref()
            }
        }
    }

    pub(crate) fn set_hash(&mut self, digest: String) {
        match self {
            Self::File { hash, .. } | Self::Dir { hash, .. } | Self::Contents { hash, .. } => {
                *hash = Some(digest)
            }
        }
    }

    /// Whether two sources describe the same input
    pub fn same_input(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Contents {
                    id: a,
                    contents: ca,
                    ..
                },
                Self::Contents {
                    id: b,
                    contents: cb,
                    ..
                },
            ) => a == b && ca == cb,
            _ => self.kind() == other.kind() && self.identifier() == other.identifier(),
        }
    }

    /// Fold the reasons of a duplicate into this source
    pub(crate) fn absorb_reasons(&mut self, other: &Self) {
        let reasons = self.reasons_mut();
        for reason in other.reasons() {
            if !reasons.contains(reason) {
                reasons.push(reason.clone());
            }
        }
    }

    /// Deterministic ordering: kind, then identifier, then contents
    pub fn sort_key_cmp(&self, other: &Self) -> Ordering {
        self.kind()
            .cmp(other.kind())
            .then_with(|| self.identifier().cmp(other.identifier()))
            .then_with(|| match (self, other) {
                (Self::Contents { contents: a, .. }, Self::Contents { contents: b, .. }) => a.cmp(b),
                _ => Ordering::Equal,
            })
    }
}

/// Final digest plus the per-source breakdown it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// SHA-256 over all source digests, lowercase hex
    pub hash: String,
    /// Sorted sources with their individual `hash` filled in
    pub inputs: Vec<HashSource>,
}

/// Strip `./` prefixes and trailing slashes, and use `/` separators
pub fn normalize_rel_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    let mut rest = trimmed;
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    if rest.is_empty() || rest == "." {
        ".".to_string()
    } else {
        rest.to_string()
    }
}
