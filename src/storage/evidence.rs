//! Append-only JSON-lines evidence trail.
//!
//! A secondary, human-auditable mirror of every state-changing call. The
//! database stays authoritative; nothing in the crate reads this file back.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::storage::model::{format_timestamp, now};

/// File name of the evidence log inside the evidence directory.
pub const EVIDENCE_FILE: &str = "archive_ops.jsonl";

/// One evidence line. Fields serialize in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvidenceRecord {
    pub ts: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EvidenceRecord {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            ts: format_timestamp(now()),
            action: action.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn tombstone(mut self, tombstone: impl Into<String>) -> Self {
        self.tombstone = Some(tombstone.into());
        self
    }

    #[must_use]
    pub fn sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    #[must_use]
    pub const fn size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach an extra field, written after the fixed ones.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Handle on the evidence file.
#[derive(Debug, Clone)]
pub struct EvidenceLog {
    path: PathBuf,
}

impl EvidenceLog {
    /// Evidence log inside `dir`. The directory is created on first append.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(EVIDENCE_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &EvidenceRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let written = file.write_all(&line);
        FileExt::unlock(&file)?;
        written?;

        debug!(action = %record.action, path = %self.path.display(), "evidence appended");
        Ok(())
    }
}
