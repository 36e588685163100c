//! Cache command - manage the local build cache

use super::{local_cache, resolve_artifact_name};
use crate::cache::{disk_usage, format_bytes, LocalBuild, LocalBuildCache};
use crate::cli::args::{ArtifactArgs, CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::{RockError, RockResult};
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> RockResult<()> {
    let cache = local_cache(config);

    match args.action {
        CacheAction::List { json } => list_builds(&cache, json),
        CacheAction::Path => {
            println!("{}", cache.builds_dir().display());
            Ok(())
        }
        CacheAction::Save {
            artifact,
            binary_path,
        } => save_build(&cache, &artifact, &binary_path, config).await,
        CacheAction::Clean { name, yes } => {
            let ctx = UiContext::detect().with_auto_yes(yes);
            clean(&ctx, &cache, name.as_deref()).await
        }
    }
}

/// List saved builds
fn list_builds(cache: &LocalBuildCache, json: bool) -> RockResult<()> {
    let ctx = UiContext::detect().with_json(json);
    let builds = cache.list()?;

    if json {
        return print_builds_json(cache, &builds);
    }

    if builds.is_empty() {
        ui::step_info(&ctx, "No cached builds found");
        return Ok(());
    }

    println!("{:<72} {:>10}  {}", "NAME", "SIZE", "BINARY");
    println!("{}", "-".repeat(100));
    for build in &builds {
        let binary = build
            .binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<72} {:>10}  {}",
            build.name,
            format_bytes(disk_usage(&build.artifact_path)),
            binary
        );
    }
    println!();
    println!(
        "Total: {} build(s), {}",
        builds.len(),
        format_bytes(disk_usage(cache.builds_dir()))
    );
    Ok(())
}

fn print_builds_json(cache: &LocalBuildCache, builds: &[LocalBuild]) -> RockResult<()> {
    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct BuildJson<'a> {
        #[serde(flatten)]
        build: &'a LocalBuild,
        size_in_bytes: u64,
    }

    let entries: Vec<BuildJson<'_>> = builds
        .iter()
        .map(|build| BuildJson {
            build,
            size_in_bytes: disk_usage(&build.artifact_path),
        })
        .collect();

    println!(
        "{}",
        serde_json::json!({
            "path": cache.builds_dir(),
            "builds": entries,
        })
    );
    Ok(())
}

/// Copy a freshly built binary into the cache
async fn save_build(
    cache: &LocalBuildCache,
    artifact: &ArtifactArgs,
    binary_path: &Path,
    config: &Config,
) -> RockResult<()> {
    let ctx = UiContext::detect();
    if !binary_path.exists() {
        return Err(RockError::PathNotFound(binary_path.to_path_buf()));
    }

    let name = resolve_artifact_name(artifact, config).await?;
    let cache = cache.clone();
    let binary = binary_path.to_path_buf();
    let build = tokio::task::spawn_blocking(move || cache.save_blocking(&name, &binary))
        .await
        .map_err(|e| RockError::Internal(format!("save task failed: {}", e)))??;

    ui::step_ok_detail(&ctx, "Saved build", &build.name);
    println!("{}", build.binary_path.display());
    Ok(())
}

/// Remove one or all saved builds
async fn clean(ctx: &UiContext, cache: &LocalBuildCache, name: Option<&str>) -> RockResult<()> {
    if let Some(name) = name {
        if cache.remove(name)? {
            ui::step_ok(ctx, &format!("Removed {}", name));
        } else {
            ui::step_warn(ctx, &format!("No cached build named {}", name));
        }
        return Ok(());
    }

    let size = disk_usage(cache.builds_dir());
    if size == 0 {
        ui::step_info(ctx, "Build cache is already empty");
        return Ok(());
    }

    ui::section(ctx, "Clean build cache");
    ui::remark(ctx, &cache.builds_dir().display().to_string());

    // Non-interactive sessions without --yes keep the cache
    let confirmed = ui::confirm(
        ctx,
        &format!("Remove all cached builds ({})?", format_bytes(size)),
        false,
    )
    .await?;
    if !confirmed {
        ui::step_warn_hint(ctx, "Build cache left untouched", "Pass --yes to skip the prompt");
        return Ok(());
    }

    let removed = cache.clean()?;
    ui::step_ok_detail(
        ctx,
        &format!("Removed {} build(s)", removed),
        &format_bytes(size),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn clean_without_confirmation_keeps_builds() {
        let root = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(root.path());
        let apk = root.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        cache.save_blocking("rock-android-debug-abc", &apk).unwrap();

        let ctx = UiContext::non_interactive();
        clean(&ctx, &cache, None).await.unwrap();
        assert!(cache.query("rock-android-debug-abc").is_some());

        clean(&ctx.with_auto_yes(true), &cache, None).await.unwrap();
        assert!(cache.query("rock-android-debug-abc").is_none());
    }

    #[tokio::test]
    async fn clean_single_build() {
        let root = TempDir::new().unwrap();
        let cache = LocalBuildCache::new(root.path());
        let apk = root.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();
        cache.save_blocking("rock-android-debug-a", &apk).unwrap();
        cache.save_blocking("rock-android-debug-b", &apk).unwrap();

        clean(&UiContext::non_interactive(), &cache, Some("rock-android-debug-a"))
            .await
            .unwrap();
        assert!(cache.query("rock-android-debug-a").is_none());
        assert!(cache.query("rock-android-debug-b").is_some());
    }
}
