//! tomb prune-request - Record that someone wants a tombstone purged

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::emit;
use crate::error::Result;

#[derive(Args, Debug)]
pub struct PruneRequestArgs {
    pub tombstone: String,

    /// Actor requesting the purge
    #[arg(long = "by")]
    pub by: String,

    #[arg(long)]
    pub reason: String,
}

#[derive(Serialize)]
struct PruneRequestReport<'a> {
    tombstone: &'a str,
    requested_by: &'a str,
    reason: &'a str,
}

pub fn run(ctx: &AppContext, args: &PruneRequestArgs) -> Result<()> {
    ctx.service()?
        .request_prune(&args.tombstone, &args.by, &args.reason)?;
    if ctx.quiet && !ctx.robot_mode {
        return Ok(());
    }
    let report = PruneRequestReport {
        tombstone: &args.tombstone,
        requested_by: &args.by,
        reason: &args.reason,
    };
    emit(ctx.robot_mode, &report, |r| {
        format!(
            "{} prune requested for {} by {}\n  a purge still needs two distinct approvers",
            "✓".green(),
            r.tombstone.cyan(),
            r.requested_by
        )
    })
}
