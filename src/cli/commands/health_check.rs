//! tomb health-check - Check that the backend is reachable and migrated

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit};
use crate::error::{ArchiveError, Result};
use crate::storage::model::ArchiveSummary;
use crate::utils::redact::redact_url_credentials;

#[derive(Args, Debug)]
pub struct HealthCheckArgs {
    /// Show the backend URL without masking credentials
    #[arg(long)]
    pub debug: bool,
}

#[derive(Serialize)]
struct HealthReport {
    healthy: bool,
    backend: String,
    url: String,
    evidence: String,
    summary: ArchiveSummary,
}

pub fn run(ctx: &AppContext, args: &HealthCheckArgs) -> Result<()> {
    let url = if args.debug {
        ctx.config.backend.url.clone()
    } else {
        redact_url_credentials(&ctx.config.backend.url)
    };
    let service = ctx.service()?;
    service
        .probe()
        .map_err(|err| ArchiveError::BackendUnavailable(format!("{url}: {err}")))?;
    let summary = service.summary()?;

    let report = HealthReport {
        healthy: true,
        backend: service.backend().to_string(),
        url,
        evidence: service.evidence().path().display().to_string(),
        summary,
    };
    emit(ctx.robot_mode, &report, |r| {
        let mut layout = HumanLayout::new();
        layout
            .title(&format!("{} archive healthy", "✓".green()))
            .kv("Backend", &r.backend)
            .kv("URL", &r.url)
            .kv("Evidence", &r.evidence)
            .kv("Items", &r.summary.count.to_string())
            .kv("Total bytes", &r.summary.total_bytes.to_string());
        layout.build()
    })
}
