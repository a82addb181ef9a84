//! tomb store - Archive a file and print its tombstone

use std::path::PathBuf;

use clap::Args;
use serde_json::Value;

use crate::app::AppContext;
use crate::cli::commands::parse_key_values;
use crate::cli::output::{emit_json, robot_ok};
use crate::error::Result;
use crate::service::ArchivePathRequest;
use crate::storage::model::{ArchiveReason, ItemKind, format_timestamp, parse_timestamp};
use crate::utils::git;

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Repository the file was removed from
    pub repo: String,

    /// File to archive
    pub filepath: PathBuf,

    /// dead, pruned, legacy or replaced
    #[arg(long)]
    pub reason: ArchiveReason,

    /// Actor performing the archive
    #[arg(long = "by")]
    pub by: String,

    /// Commit the file was removed in (`HEAD` is resolved through git)
    #[arg(long)]
    pub commit: String,

    /// code, doc or asset
    #[arg(long, default_value = "code")]
    pub kind: ItemKind,

    #[arg(long)]
    pub language: Option<String>,

    /// Override MIME type inferred from the extension
    #[arg(long = "mime")]
    pub mime: Option<String>,

    /// Tag to attach (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Extra metadata as KEY=VALUE (repeatable)
    #[arg(long = "metadata")]
    pub metadata: Vec<String>,

    /// Place the item under legal hold
    #[arg(long)]
    pub legal_hold: bool,

    /// Earliest time the item may be deleted
    #[arg(long)]
    pub delete_after: Option<String>,
}

pub fn run(ctx: &AppContext, args: &StoreArgs) -> Result<()> {
    let commit_sha = if git::is_symbolic_rev(&args.commit) {
        let base = args
            .filepath
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| ctx.root.clone(), PathBuf::from);
        git::resolve_commit(&base, &args.commit)?
    } else {
        args.commit.clone()
    };

    let mut extra = parse_key_values(&args.metadata)?;
    if args.legal_hold {
        extra.insert("legal_hold".into(), Value::Bool(true));
    }
    if let Some(raw) = &args.delete_after {
        extra.insert("delete_after".into(), Value::from(format_timestamp(parse_timestamp(raw)?)));
    }

    let mut request = ArchivePathRequest::new(
        args.repo.as_str(),
        args.filepath.as_path(),
        args.reason,
        args.by.as_str(),
        commit_sha,
    );
    request.kind = args.kind;
    request.language.clone_from(&args.language);
    request.mime_type.clone_from(&args.mime);
    request.tags.clone_from(&args.tags);
    request.extra_metadata = extra;

    let service = ctx.service()?;
    let result = service.archive_path(request)?;
    if ctx.robot_mode {
        emit_json(&robot_ok(&result))
    } else {
        emit_json(&result)
    }
}
