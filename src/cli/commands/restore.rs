//! tomb restore - Restore a tombstone's bytes to a path

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use crate::app::AppContext;
use crate::cli::output::emit;
use crate::error::{ArchiveError, Result};
use crate::utils::redact::redact_url_credentials;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Tombstone id printed by `store`
    pub tombstone: String,

    /// Where to write the restored file
    pub output: PathBuf,

    /// Actor performing the restore (default: $TOMB_ACTOR)
    #[arg(long = "by")]
    pub by: Option<String>,

    /// Include the unredacted backend URL in failure messages
    #[arg(long)]
    pub debug: bool,
}

#[derive(Serialize)]
struct RestoreReport {
    tombstone: String,
    output: String,
    actor: String,
}

pub fn run(ctx: &AppContext, args: &RestoreArgs) -> Result<()> {
    let actor = ctx.actor(args.by.as_deref())?;
    let url = if args.debug {
        ctx.config.backend.url.clone()
    } else {
        redact_url_credentials(&ctx.config.backend.url)
    };

    let service = ctx
        .service()
        .map_err(|err| unreachable_backend(&url, &err))?;
    service.probe().map_err(|err| unreachable_backend(&url, &err))?;
    debug!(backend = %service.backend(), url = %url, "restore pre-flight ok");

    let written = service.restore_to_path(&args.tombstone, &args.output, &actor)?;
    let report = RestoreReport {
        tombstone: args.tombstone.clone(),
        output: written.display().to_string(),
        actor,
    };
    if ctx.quiet && !ctx.robot_mode {
        return Ok(());
    }
    emit(ctx.robot_mode, &report, |r| {
        format!("{} restored {} to {}", "✓".green(), r.tombstone.cyan(), r.output)
    })
}

/// Pre-flight failures mean the backend itself is unusable, not that the tombstone is missing.
fn unreachable_backend(url: &str, err: &ArchiveError) -> ArchiveError {
    match err {
        ArchiveError::Config(_) | ArchiveError::UnsupportedBackend(_) => {
            ArchiveError::Config(err.to_string())
        }
        _ => ArchiveError::BackendUnavailable(format!("{url}: {err}")),
    }
}
