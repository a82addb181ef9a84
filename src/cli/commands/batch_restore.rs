//! tomb batch-restore - Restore every entry of a manifest

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::batch::{
    BatchItemResult, BatchOptions, BatchProgress, BatchRestore, BatchSummary, ProgressCallback,
    load_manifest,
};
use crate::cli::output::{HumanLayout, emit};
use crate::cli::progress::{ProgressHandle, ProgressMode};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct BatchRestoreArgs {
    /// JSON or CSV manifest of `tombstone,output[,actor]` entries
    pub manifest: PathBuf,

    /// Default actor for entries without their own
    #[arg(long = "by")]
    pub by: Option<String>,

    /// Keep going after a failed entry
    #[arg(long)]
    pub continue_on_error: bool,

    /// Skip manifest entries before this index
    #[arg(long, default_value_t = 0)]
    pub resume_from: usize,

    /// Write per-item results here as JSON
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Serialize)]
struct BatchReport<'a> {
    summary: BatchSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    results_path: Option<String>,
    items: &'a [BatchItemResult],
}

pub fn run(ctx: &AppContext, args: &BatchRestoreArgs) -> Result<()> {
    let actor = ctx.actor(args.by.as_deref())?;
    let entries = load_manifest(&args.manifest)?;
    let service = ctx.service()?;

    let mut options = BatchOptions::from_config(
        &ctx.config.batch,
        ctx.config.retry.enabled.then(|| ctx.config.retry.policy()),
    );
    options.continue_on_error |= args.continue_on_error;

    let progress = ProgressHandle::start(
        ProgressMode::detect(ctx.robot_mode, ctx.quiet),
        entries.len() as u64,
        "batch restore",
    );
    let mut on_progress = |p: &BatchProgress<'_>| progress.set_position(p.processed as u64);
    let callback: &mut ProgressCallback<'_> = &mut on_progress;

    let mut batch = BatchRestore::new(&service, options);
    let outcome = batch.restore(&entries, &actor, args.resume_from, Some(callback));

    let results_path = args
        .output
        .clone()
        .or_else(|| ctx.config.batch.results_path.clone());
    let summary = match &results_path {
        Some(path) => batch.save_results(path, &actor)?,
        None => batch.summary(),
    };

    if let Err(err) = outcome {
        progress.abandon_with_message(&format!("stopped after {} failure(s)", summary.failed));
        return Err(err);
    }
    if summary.failed > 0 {
        progress.abandon_with_message(&format!("{} of {} failed", summary.failed, summary.total));
    } else {
        progress.finish_with_message(&format!("{} restored", summary.succeeded));
    }

    if ctx.quiet && !ctx.robot_mode {
        return Ok(());
    }
    let report = BatchReport {
        summary,
        results_path: results_path.map(|p| p.display().to_string()),
        items: batch.results(),
    };
    emit(ctx.robot_mode, &report, |r| {
        let mut layout = HumanLayout::new();
        layout
            .title("Batch restore")
            .kv("Total", &r.summary.total.to_string())
            .kv("Succeeded", &r.summary.succeeded.to_string())
            .kv("Failed", &r.summary.failed.to_string())
            .kv("Skipped", &r.summary.skipped.to_string())
            .kv("Duration ms", &r.summary.total_duration_ms.to_string());
        if let Some(path) = &r.results_path {
            layout.kv("Results", path);
        }
        let failures: Vec<_> = r.items.iter().filter(|i| i.error.is_some()).collect();
        if !failures.is_empty() {
            layout.blank().section("Failures");
            for item in failures {
                layout.bullet(&format!(
                    "{} {}",
                    item.item.tombstone.red(),
                    item.error.as_deref().unwrap_or_default()
                ));
            }
        }
        layout.build()
    })
}
