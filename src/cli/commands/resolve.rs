//! Resolve-binary command - find a cached binary for the current sources
//!
//! Prints the binary path on stdout. Empty output with exit code 0 means no
//! cached build matched and the caller should build from source.

use super::{local_cache, project_root, resolve_artifact_name};
use crate::cache::{get_binary_path, BinaryPathRequest, CancelFlag, FetchOptions};
use crate::cli::args::ResolveArgs;
use crate::config::Config;
use crate::error::RockResult;
use crate::fingerprint::FingerprintOptions;
use crate::remote::{create_remote_cache, RemoteCacheSetting};
use crate::ui::{self, DownloadProgress, UiContext};
use tracing::warn;

/// Execute the resolve-binary command
pub async fn execute(args: ResolveArgs, config: &Config) -> RockResult<()> {
    let ctx = UiContext::detect();

    // An explicit binary needs neither a fingerprint nor a provider
    if let Some(path) = &args.binary_path {
        println!("{}", path.display());
        return Ok(());
    }

    let artifact_name = resolve_artifact_name(&args.artifact, config).await?;
    let source_dir = project_root(args.artifact.source.as_deref())?;
    let platform = args
        .artifact
        .platform
        .as_deref()
        .and_then(|p| p.parse().ok());

    // A broken provider setup degrades to "build locally", like any other
    // remote failure
    let remote = if args.local {
        None
    } else {
        let setting = RemoteCacheSetting::from_config(&config.remote_cache);
        match create_remote_cache(setting, &config.remote_cache).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Remote cache unavailable: {}", e);
                if let Some(hint) = e.hint() {
                    ui::step_warn_hint(&ctx, "Remote cache unavailable", hint);
                }
                None
            }
        }
    };

    let request = BinaryPathRequest {
        artifact_name: artifact_name.clone(),
        binary_path_flag: None,
        local_flag: args.local,
        remote,
        fingerprint: FingerprintOptions::from_config(&config.fingerprint, &config.cache),
        platform,
        source_dir,
    };

    let cache = local_cache(config);
    let progress = DownloadProgress::new(&ctx, &artifact_name);
    let fetch = FetchOptions {
        cancel: CancelFlag::on_ctrl_c(),
        progress: progress.bar(),
    };
    let binary = get_binary_path(&request, &cache, &fetch).await;
    progress.finish();

    match binary {
        Some(path) => {
            ui::step_ok_detail(&ctx, "Found cached build", &artifact_name);
            println!("{}", path.display());
        }
        None => ui::step_info(&ctx, &format!("No cached build for {}", artifact_name)),
    }
    Ok(())
}
