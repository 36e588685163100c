//! Fingerprint command - print the native fingerprint of a project

use super::{project_root, require_platform};
use crate::cli::args::FingerprintArgs;
use crate::config::Config;
use crate::error::RockResult;
use crate::fingerprint::{native_fingerprint, Fingerprint, FingerprintOptions};
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the fingerprint command
pub async fn execute(args: FingerprintArgs, config: &Config) -> RockResult<()> {
    let platform = require_platform(args.platform.as_deref())?;
    let root = project_root(args.source.as_deref())?;
    let options = FingerprintOptions::from_config(&config.fingerprint, &config.cache);

    // --raw output is meant for scripts; keep stderr quiet too
    let ctx = UiContext::detect().with_json(args.raw);
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Fingerprinting {} sources...", platform));

    let fingerprint = match native_fingerprint(&root, Some(platform), &options).await {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            spinner.stop_error("Fingerprint failed");
            return Err(e);
        }
    };
    spinner.stop(&format!(
        "Hashed {} sources for {}",
        fingerprint.inputs.len(),
        platform
    ));

    if args.raw {
        println!("{}", fingerprint.hash);
        return Ok(());
    }

    if args.debug {
        print_sources(&ctx, &fingerprint);
    }

    ui::key_value(&ctx, "Platform", platform.as_str());
    ui::key_value(&ctx, "Hash", &fingerprint.hash);
    Ok(())
}

fn print_sources(ctx: &UiContext, fingerprint: &Fingerprint) {
    ui::section(ctx, "Sources");
    for source in &fingerprint.inputs {
        println!(
            "  {:<8} {:<12} {}  [{}]",
            source.kind(),
            source.hash().map(|h| &h[..h.len().min(12)]).unwrap_or("-"),
            source.identifier(),
            source.reasons().join(", ")
        );
    }
    println!();
}
