//! tomb ref - Attach an external reference to a tombstone

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::emit;
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ReferentArgs {
    pub tombstone: String,

    /// Kind of reference, e.g. `ticket` or `pr`
    #[arg(value_name = "TYPE")]
    pub ref_type: String,

    #[arg(value_name = "VALUE")]
    pub ref_value: String,
}

#[derive(Serialize)]
struct ReferentReport<'a> {
    tombstone: &'a str,
    ref_type: &'a str,
    ref_value: &'a str,
}

pub fn run(ctx: &AppContext, args: &ReferentArgs) -> Result<()> {
    ctx.service()?
        .add_referent(&args.tombstone, &args.ref_type, &args.ref_value)?;
    if ctx.quiet && !ctx.robot_mode {
        return Ok(());
    }
    let report = ReferentReport {
        tombstone: &args.tombstone,
        ref_type: &args.ref_type,
        ref_value: &args.ref_value,
    };
    emit(ctx.robot_mode, &report, |r| {
        format!("{} {} -> {}: {}", "✓".green(), r.tombstone.cyan(), r.ref_type, r.ref_value)
    })
}
