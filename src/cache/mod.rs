//! Build caching
//!
//! Artifacts are keyed by name (`rock-<platform>-<traits>-<fingerprint>`),
//! stored locally under the cache root and optionally mirrored in a remote
//! cache.
//!
//! # Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `<root>/remote-build/<name>/` | one saved build (file or `.app` bundle) |
//! | `<root>/remote-build/.staging-*` | in-flight saves and downloads |

pub mod archive;
pub mod artifact;
pub mod local;
pub mod resolve;

pub use archive::{pack_artifact, BUNDLE_ARCHIVE_NAME};
pub use artifact::{format_artifact_name, parse_traits, render_artifact_name};
pub use local::{
    disk_usage, find_binary, format_bytes, validate_artifact_name, LocalBuild, LocalBuildCache, BUILD_CACHE_DIR,
};
pub use resolve::{
    fetch_remote_build, get_binary_path, BinaryPathRequest, CancelFlag, FetchOptions,
};
