//! tomb show - Show one tombstone with its event history

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit};
use crate::error::Result;
use crate::storage::model::{ItemDetail, format_timestamp};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Tombstone id printed by `store`
    pub tombstone: String,
}

pub fn run(ctx: &AppContext, args: &ShowArgs) -> Result<()> {
    let detail = ctx.service()?.show_item(&args.tombstone)?;
    emit(ctx.robot_mode, &detail, render)
}

fn render(detail: &ItemDetail) -> String {
    let item = &detail.item;
    let mut layout = HumanLayout::new();
    layout
        .title(&format!("Tombstone {}", item.tombstone_id))
        .kv("Repo", &item.repo)
        .kv("Path", &item.path)
        .kv("Commit", &item.commit_sha)
        .kv("Kind", item.kind.as_str())
        .kv("Reason", item.reason.as_str())
        .kv("Archived by", &item.archived_by)
        .kv("Archived at", &format_timestamp(item.archived_at))
        .kv("Legal hold", if item.legal_hold { "yes" } else { "no" });
    if let Some(language) = &item.language {
        layout.kv("Language", language);
    }
    if let Some(ts) = item.delete_after {
        layout.kv("Delete after", &format_timestamp(ts));
    }
    if let Some(ts) = item.restored_at {
        layout.kv("Restored at", &format_timestamp(ts));
    }
    for key in ["sha256", "size_bytes", "compression", "mime_type"] {
        if let Some(value) = item.metadata.get(key) {
            let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            layout.kv(key, &text);
        }
    }

    if !detail.tags.is_empty() {
        layout.blank().section("Tags");
        for tag in &detail.tags {
            layout.bullet(tag);
        }
    }
    if !detail.referents.is_empty() {
        layout.blank().section("Referents");
        for referent in &detail.referents {
            layout.bullet(&format!("{}: {}", referent.ref_type, referent.ref_value));
        }
    }

    layout.blank().section("Events");
    for event in &detail.events {
        layout.bullet(&format!(
            "{} {} by {}",
            format_timestamp(event.created_at),
            event.action,
            event.actor
        ));
    }
    layout.build()
}
