//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Rock - native build caching for React Native
///
/// Fingerprints the native parts of a project and reuses matching builds
/// from a local or remote cache instead of rebuilding them.
#[derive(Parser, Debug)]
#[command(name = "rock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ROCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip project-local rock.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the native fingerprint of a project
    Fingerprint(FingerprintArgs),

    /// Query and manage the remote build cache
    RemoteCache(RemoteCacheArgs),

    /// Print a cached binary for the current sources, if one exists
    ResolveBinary(ResolveArgs),

    /// Manage the local build cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Options naming an artifact: an explicit name, or platform + traits
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ArtifactArgs {
    /// Target platform (android, ios, harmony)
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Build traits folded into the artifact name (comma-separated)
    #[arg(short, long)]
    pub traits: Option<String>,

    /// Explicit artifact name instead of computing one
    #[arg(long)]
    pub name: Option<String>,

    /// Project root (defaults to current directory)
    #[arg(long)]
    pub source: Option<PathBuf>,
}

/// Arguments for the fingerprint command
#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// Target platform (android, ios, harmony)
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Project root (defaults to current directory)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Print only the hash
    #[arg(long)]
    pub raw: bool,

    /// Print every hashed source with its digest and reasons
    #[arg(long)]
    pub debug: bool,
}

/// Remote cache actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RemoteAction {
    /// List artifacts matching the current fingerprint
    #[value(alias = "query")]
    List,
    /// List every artifact (filtered by --platform/--traits when given)
    ListAll,
    /// Download the matching artifact into the local cache
    Download,
    /// Pack and upload a binary
    Upload,
    /// Delete matching artifacts
    Delete,
    /// Print the configured provider name
    GetProviderName,
}

/// Arguments for the remote-cache command
#[derive(Parser, Debug)]
pub struct RemoteCacheArgs {
    /// Action to perform
    #[arg(value_enum)]
    pub action: RemoteAction,

    #[command(flatten)]
    pub artifact: ArtifactArgs,

    /// Binary to upload (defaults to the locally cached build)
    #[arg(long)]
    pub binary_path: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,

    /// Delete every matching artifact
    #[arg(long)]
    pub all: bool,

    /// Delete every matching artifact except the most recent
    #[arg(long)]
    pub all_but_latest: bool,
}

/// Arguments for the resolve-binary command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub artifact: ArtifactArgs,

    /// Use this binary instead of looking in any cache
    #[arg(long)]
    pub binary_path: Option<PathBuf>,

    /// Skip build caches and report that a fresh build is needed
    #[arg(long)]
    pub local: bool,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List saved builds
    List {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the local build cache directory
    Path,

    /// Save a freshly built binary under its artifact name
    Save {
        #[command(flatten)]
        artifact: ArtifactArgs,

        /// Binary or .app bundle to save
        #[arg(long)]
        binary_path: PathBuf,
    },

    /// Remove saved builds
    Clean {
        /// Only remove this artifact
        #[arg(long)]
        name: Option<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}
