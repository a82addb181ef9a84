//! tomb init - Apply the schema to the configured backend

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::emit;
use crate::error::Result;
use crate::utils::redact::redact_url_credentials;

#[derive(Args, Debug)]
pub struct InitArgs {}

#[derive(Serialize)]
struct InitReport {
    backend: String,
    url: String,
    evidence: String,
}

pub fn run(ctx: &AppContext, _args: &InitArgs) -> Result<()> {
    let service = ctx.service()?;
    service.ensure_schema()?;

    let report = InitReport {
        backend: service.backend().to_string(),
        url: redact_url_credentials(&ctx.config.backend.url),
        evidence: service.evidence().path().display().to_string(),
    };
    if ctx.quiet && !ctx.robot_mode {
        return Ok(());
    }
    emit(ctx.robot_mode, &report, |r| {
        format!(
            "{} schema applied to {} ({})\n  evidence: {}",
            "✓".green(),
            r.backend.bold(),
            r.url,
            r.evidence
        )
    })
}
