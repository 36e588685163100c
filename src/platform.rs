//! Target platforms and the binaries they produce

use crate::error::{RockError, RockResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Native platform a React Native project is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Gradle project under `android/`
    Android,
    /// Xcode + CocoaPods project under `ios/`
    Ios,
    /// Hvigor project under `harmony/`
    Harmony,
}

impl Platform {
    /// All platforms, in a stable order
    pub fn all() -> &'static [Self] {
        &[Self::Android, Self::Ios, Self::Harmony]
    }

    /// Identifier used in artifact names and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Harmony => "harmony",
        }
    }

    /// Native project directory relative to the project root
    pub fn project_dir(&self) -> &'static str {
        self.as_str()
    }

    /// Extensions of build outputs that count as a runnable binary
    pub fn binary_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Android => &["apk", "aab"],
            Self::Ios => &["app", "ipa"],
            Self::Harmony => &["hap"],
        }
    }

    /// Whether the binary for this platform is a directory bundle.
    ///
    /// Bundles are shipped as `app.tar.gz` so the executable bit survives zipping.
    pub fn has_bundle_binary(&self) -> bool {
        matches!(self, Self::Ios)
    }

    /// Gitignore-style patterns (relative to the project root) excluded from
    /// the fingerprint of this platform's native sources
    pub fn default_ignore_paths(&self) -> &'static [&'static str] {
        match self {
            Self::Android => &[
                "android/build/",
                "android/**/build/",
                "android/.gradle/",
                "android/**/.cxx/",
                "android/.idea/",
                "android/local.properties",
                "android/**/*.iml",
                "android/**/*.hprof",
                "node_modules/**/android/build/",
                "node_modules/**/android/.gradle/",
                "node_modules/**/android/.cxx/",
            ],
            Self::Ios => &[
                "ios/Pods/",
                "ios/build/",
                "ios/**/xcuserdata/",
                "ios/*.xcworkspace/",
                "ios/.xcode.env.local",
                "node_modules/**/ios/build/",
            ],
            Self::Harmony => &[
                "harmony/build/",
                "harmony/**/build/",
                "harmony/.hvigor/",
                "harmony/**/oh_modules/",
                "harmony/local.properties",
                "node_modules/**/harmony/build/",
            ],
        }
    }
}

/// Patterns excluded for every platform
pub const COMMON_IGNORE_PATHS: &[&str] = &["**/.git/", "**/.DS_Store", "**/*.swp"];

/// Extensions recognised as a binary on any platform
pub const ALL_BINARY_EXTENSIONS: &[&str] = &["apk", "aab", "app", "ipa", "hap"];

/// Check whether a path looks like a build output binary
pub fn is_binary_path(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = RockError;

    fn from_str(s: &str) -> RockResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            "harmony" => Ok(Self::Harmony),
            other => Err(RockError::InvalidPlatform(other.to_string())),
        }
    }
}
