//! Git utilities

use std::path::Path;

use git2::Repository;

use crate::error::Result;

/// Resolve `rev` (e.g. `HEAD`, a branch or a short sha) to a full commit sha,
/// discovering the repository from `path` upwards.
pub fn resolve_commit(path: &Path, rev: &str) -> Result<String> {
    let start = if path.is_dir() {
        path
    } else {
        path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."))
    };
    let repo = Repository::discover(start)?;
    let commit = repo.revparse_single(rev)?.peel_to_commit()?;
    Ok(commit.id().to_string())
}

/// Whether `rev` should be resolved through git rather than stored verbatim.
#[must_use]
pub fn is_symbolic_rev(rev: &str) -> bool {
    rev.eq_ignore_ascii_case("HEAD") || rev.starts_with("HEAD~") || rev.starts_with("HEAD^")
}
