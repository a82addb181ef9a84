//! tomb list - List archived items, most recent first

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::emit;
use crate::error::Result;
use crate::storage::model::{DEFAULT_LIST_LIMIT, ItemSummary, ListFilter, format_timestamp, parse_timestamp};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only items from this repository
    #[arg(long)]
    pub repo: Option<String>,

    /// Only items archived at or after this time
    #[arg(long)]
    pub since: Option<String>,

    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: u32,
}

pub fn run(ctx: &AppContext, args: &ListArgs) -> Result<()> {
    let filter = ListFilter {
        repo: args.repo.clone(),
        since: args.since.as_deref().map(parse_timestamp).transpose()?,
        limit: args.limit,
    };
    let items = ctx.service()?.list_items(&filter)?;
    emit(ctx.robot_mode, &items, |items| render(items))
}

fn render(items: &[ItemSummary]) -> String {
    if items.is_empty() {
        return "No archived items.".dimmed().to_string();
    }
    let mut out = Vec::with_capacity(items.len() + 1);
    out.push(format!("{} archived item(s)", items.len()).bold().to_string());
    for item in items {
        out.push(format!(
            "{}  {}  {}:{}  {} by {}",
            item.tombstone_id.cyan(),
            format_timestamp(item.archived_at).dimmed(),
            item.repo,
            item.path,
            item.reason,
            item.archived_by
        ));
    }
    out.join("\n")
}
