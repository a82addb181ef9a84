//! tomb purge - Dual-control delete approval

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::emit;
use crate::error::Result;
use crate::storage::model::DeleteApproval;

#[derive(Args, Debug)]
pub struct PurgeArgs {
    pub tombstone: String,

    /// Primary approver
    #[arg(long = "by")]
    pub by: String,

    /// Secondary approver; must differ from --by
    #[arg(long)]
    pub second: String,

    #[arg(long)]
    pub reason: String,

    /// Scrub the stored bytes once every item sharing them is purged
    #[arg(long)]
    pub apply: bool,
}

#[derive(Serialize)]
struct PurgeReport {
    tombstone: String,
    primary: String,
    secondary: String,
    applied: bool,
    blob_scrubbed: bool,
}

pub fn run(ctx: &AppContext, args: &PurgeArgs) -> Result<()> {
    let approval = DeleteApproval {
        tombstone_id: args.tombstone.clone(),
        primary_actor: args.by.clone(),
        secondary_actor: args.second.clone(),
        reason: args.reason.clone(),
        apply: args.apply,
    };
    // Rejected before any connection is opened.
    approval.validate()?;

    let scrubbed = ctx.service()?.approve_delete(&approval)?;
    if ctx.quiet && !ctx.robot_mode {
        return Ok(());
    }
    let report = PurgeReport {
        tombstone: approval.tombstone_id,
        primary: approval.primary_actor,
        secondary: approval.secondary_actor,
        applied: approval.apply,
        blob_scrubbed: scrubbed,
    };
    emit(ctx.robot_mode, &report, |r| {
        let outcome = match (r.applied, r.blob_scrubbed) {
            (false, _) => "approval recorded; bytes kept (no --apply)".to_string(),
            (true, true) => "approval recorded; bytes scrubbed".to_string(),
            (true, false) => "approval recorded; bytes kept while other items share them".to_string(),
        };
        format!(
            "{} {} {}\n  approvers: {}, {}",
            "✓".green(),
            r.tombstone.cyan(),
            outcome,
            r.primary,
            r.secondary
        )
    })
}
