//! Remote cache command - list, download, upload and delete artifacts

use super::{local_cache, require_platform, resolve_artifact_name};
use crate::cache::{
    fetch_remote_build, format_bytes, pack_artifact, parse_traits, render_artifact_name,
    CancelFlag, FetchOptions,
};
use crate::cli::args::{RemoteAction, RemoteCacheArgs};
use crate::config::{Config, ProviderKind};
use crate::error::{RockError, RockResult};
use crate::remote::{
    create_remote_cache, DeleteRequest, ListRequest, RemoteArtifact, RemoteBuildCache,
    RemoteCacheSetting, UploadRequest,
};
use crate::ui::{self, DownloadProgress, TaskSpinner, UiContext};
use std::sync::Arc;
use tracing::debug;

/// Execute the remote-cache command
pub async fn execute(args: RemoteCacheArgs, config: &Config) -> RockResult<()> {
    validate_flags(&args)?;
    let ctx = UiContext::detect().with_json(args.json);

    if args.action == RemoteAction::GetProviderName {
        return print_provider_name(&ctx, config.remote_cache.provider, args.json);
    }

    let setting = RemoteCacheSetting::from_config(&config.remote_cache);
    let remote = create_remote_cache(setting, &config.remote_cache)
        .await?
        .ok_or(RockError::RemoteNotConfigured)?;
    debug!("Using remote cache provider {}", remote.name());

    match args.action {
        RemoteAction::List => {
            let name = resolve_artifact_name(&args.artifact, config).await?;
            let artifacts = remote.list(ListRequest::named(&name)).await?;
            print_artifacts(&ctx, &artifacts, args.json)
        }
        RemoteAction::ListAll => list_all(&ctx, remote.as_ref(), &args).await,
        RemoteAction::Download => download(&ctx, remote, &args, config).await,
        RemoteAction::Upload => upload(&ctx, remote.as_ref(), &args, config).await,
        RemoteAction::Delete => delete(&ctx, remote.as_ref(), &args, config).await,
        RemoteAction::GetProviderName => Ok(()),
    }
}

fn validate_flags(args: &RemoteCacheArgs) -> RockResult<()> {
    if args.all && args.all_but_latest {
        return Err(RockError::IncompatibleFlags(
            "--all cannot be combined with --all-but-latest".to_string(),
        ));
    }
    if (args.all || args.all_but_latest) && args.action != RemoteAction::Delete {
        return Err(RockError::IncompatibleFlags(
            "--all and --all-but-latest only apply to delete".to_string(),
        ));
    }
    if args.binary_path.is_some() && args.action != RemoteAction::Upload {
        return Err(RockError::IncompatibleFlags(
            "--binary-path only applies to upload".to_string(),
        ));
    }
    Ok(())
}

fn print_provider_name(ctx: &UiContext, provider: ProviderKind, json: bool) -> RockResult<()> {
    let name = match provider {
        ProviderKind::None => return Err(RockError::RemoteNotConfigured),
        ProviderKind::Github => "GitHub",
        ProviderKind::S3 => "S3",
    };
    if json {
        println!("{}", serde_json::json!({ "name": name }));
    } else {
        ui::key_value(ctx, "Provider", name);
    }
    Ok(())
}

async fn list_all(
    ctx: &UiContext,
    remote: &dyn RemoteBuildCache,
    args: &RemoteCacheArgs,
) -> RockResult<()> {
    let mut artifacts = remote.list(ListRequest::all()).await?;

    // Narrow to one platform (and traits) when asked; an empty hash renders
    // the shared `rock-<platform>-<traits>-` prefix
    let prefix = match (&args.artifact.name, &args.artifact.platform) {
        (Some(name), _) => Some(name.clone()),
        (None, Some(platform)) => {
            let platform = require_platform(Some(platform))?;
            let traits = args
                .artifact
                .traits
                .as_deref()
                .map(parse_traits)
                .unwrap_or_default();
            Some(render_artifact_name(platform, &traits, ""))
        }
        (None, None) => None,
    };
    if let Some(prefix) = prefix {
        artifacts.retain(|a| a.name.starts_with(&prefix));
    }

    print_artifacts(ctx, &artifacts, args.json)
}

async fn download(
    ctx: &UiContext,
    remote: Arc<dyn RemoteBuildCache>,
    args: &RemoteCacheArgs,
    config: &Config,
) -> RockResult<()> {
    let name = resolve_artifact_name(&args.artifact, config).await?;
    let cache = local_cache(config);

    let build = match cache.query(&name) {
        Some(build) => {
            ui::step_ok_detail(ctx, "Already in local cache", &name);
            build
        }
        None => {
            let progress = DownloadProgress::new(ctx, &name);
            let fetch = FetchOptions {
                cancel: CancelFlag::on_ctrl_c(),
                progress: progress.bar(),
            };
            let result = fetch_remote_build(remote.as_ref(), &name, &cache, &fetch).await;
            progress.finish();
            match result? {
                Some(build) => {
                    ui::step_ok_detail(ctx, "Downloaded", &name);
                    build
                }
                None => {
                    return Err(RockError::User(format!(
                        "No artifact named {} on {}",
                        name,
                        remote.name()
                    )))
                }
            }
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&build)?);
    } else {
        println!("{}", build.binary_path.display());
    }
    Ok(())
}

async fn upload(
    ctx: &UiContext,
    remote: &dyn RemoteBuildCache,
    args: &RemoteCacheArgs,
    config: &Config,
) -> RockResult<()> {
    let name = resolve_artifact_name(&args.artifact, config).await?;
    let binary = match &args.binary_path {
        Some(path) => path.clone(),
        None => local_cache(config).binary_path(&name).ok_or_else(|| {
            RockError::User(format!(
                "No local build for {}; pass --binary-path to choose one",
                name
            ))
        })?,
    };
    if !binary.exists() {
        return Err(RockError::PathNotFound(binary));
    }

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start(&format!("Packing {}...", binary.display()));
    let staging = tempfile::tempdir().map_err(|e| RockError::io("creating upload staging", e))?;
    let archive_path = staging.path().join(format!("{}.zip", name));
    let packed = {
        let binary = binary.clone();
        let archive_path = archive_path.clone();
        tokio::task::spawn_blocking(move || pack_artifact(&binary, &archive_path))
            .await
            .map_err(|e| RockError::Internal(format!("packing task failed: {}", e)))?
    };
    if let Err(e) = packed {
        spinner.stop_error("Packing failed");
        return Err(e);
    }
    spinner.stop(&format!("Packed {}", binary.display()));

    spinner.start(&format!("Uploading {} to {}...", name, remote.name()));
    let artifact = match remote
        .upload(UploadRequest {
            artifact_name: name.clone(),
            archive_path,
        })
        .await
    {
        Ok(artifact) => artifact,
        Err(e) => {
            spinner.stop_error("Upload failed");
            return Err(e);
        }
    };
    spinner.stop(&format!("Uploaded {}", artifact.name));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&artifact)?);
    } else {
        ui::key_value(ctx, "Name", &artifact.name);
        ui::key_value(ctx, "Url", &artifact.url);
    }
    Ok(())
}

async fn delete(
    ctx: &UiContext,
    remote: &dyn RemoteBuildCache,
    args: &RemoteCacheArgs,
    config: &Config,
) -> RockResult<()> {
    let name = resolve_artifact_name(&args.artifact, config).await?;
    let deleted = remote
        .delete(DeleteRequest {
            artifact_name: name.clone(),
            limit: (!args.all && !args.all_but_latest).then_some(1),
            skip_latest: args.all_but_latest,
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&deleted)?);
        return Ok(());
    }
    if deleted.is_empty() {
        ui::step_warn(ctx, &format!("Nothing to delete for {}", name));
    } else {
        ui::step_ok_detail(
            ctx,
            &format!("Deleted {} artifact(s)", deleted.len()),
            remote.name(),
        );
        for artifact in &deleted {
            ui::remark(ctx, &artifact.name);
        }
    }
    Ok(())
}

fn print_artifacts(ctx: &UiContext, artifacts: &[RemoteArtifact], json: bool) -> RockResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        ui::step_info(ctx, "No remote artifacts found");
        return Ok(());
    }

    println!("{:<72} {:>10} {:<17}", "NAME", "SIZE", "CREATED");
    println!("{}", "-".repeat(101));
    for artifact in artifacts {
        let size = artifact
            .size_in_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string());
        let created = artifact
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<72} {:>10} {:<17}", artifact.name, size, created);
    }
    println!();
    println!("Total: {} artifact(s)", artifacts.len());
    Ok(())
}
