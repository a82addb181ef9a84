//! Archive service: the use cases on top of one [`ArchiveStore`].
//!
//! Every state-changing call also appends a line to the evidence trail. The
//! database commit is authoritative: a failed append is logged, not returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::storage::content::{self, Codec};
use crate::storage::dal::{ArchiveStore, Dal};
use crate::storage::evidence::{EvidenceLog, EvidenceRecord};
use crate::storage::model::{
    ArchiveReason, ArchiveRequest, ArchiveSummary, ArtifactPayload, DeleteApproval, ItemDetail,
    ItemKind, ItemSummary, ListFilter, RestorePayload, StorageDriver,
};
use crate::storage::schema::Backend;
use crate::utils::paths::resolve_against;
use crate::utils::redact::{redact_url_credentials, sanitize_message};

/// Tuning that does not change archive semantics.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub codec: Codec,
    pub level: i32,
    /// Retry policy for restore payload reads; `None` disables retries.
    pub retry: Option<RetryPolicy>,
    pub enable_metrics: bool,
    pub track_decompression: bool,
    /// Connection URL with credentials already masked, for failure evidence.
    pub display_url: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            codec: Codec::default(),
            level: content::DEFAULT_LEVEL,
            retry: None,
            enable_metrics: false,
            track_decompression: false,
            display_url: None,
        }
    }
}

impl ServiceOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            codec: config.compression.codec,
            level: config.compression.level,
            retry: config.retry.enabled.then(|| config.retry.policy()),
            enable_metrics: config.performance.enable_metrics,
            track_decompression: config.performance.track_decompression,
            display_url: Some(redact_url_credentials(&config.backend.url)),
        }
    }
}

/// Inputs for [`ArchiveService::archive_path`].
#[derive(Debug, Clone)]
pub struct ArchivePathRequest {
    pub repo: String,
    pub path: PathBuf,
    pub reason: ArchiveReason,
    pub archived_by: String,
    pub commit_sha: String,
    pub kind: ItemKind,
    pub language: Option<String>,
    pub mime_type: Option<String>,
    pub tags: Vec<String>,
    pub extra_metadata: Map<String, Value>,
}

impl ArchivePathRequest {
    /// Request with the default kind (`code`) and no optional fields.
    pub fn new(
        repo: impl Into<String>,
        path: impl Into<PathBuf>,
        reason: ArchiveReason,
        archived_by: impl Into<String>,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
            reason,
            archived_by: archived_by.into(),
            commit_sha: commit_sha.into(),
            kind: ItemKind::Code,
            language: None,
            mime_type: None,
            tags: Vec::new(),
            extra_metadata: Map::new(),
        }
    }
}

/// What `store` reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResult {
    #[serde(rename = "tombstone")]
    pub tombstone_id: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub compressed_size: i64,
    pub repo: String,
    pub path: String,
}

pub struct ArchiveService {
    store: Box<dyn ArchiveStore>,
    evidence: EvidenceLog,
    options: ServiceOptions,
}

impl std::fmt::Debug for ArchiveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveService")
            .field("backend", &self.store.backend())
            .field("evidence", &self.evidence.path())
            .finish_non_exhaustive()
    }
}

impl ArchiveService {
    pub fn new(store: impl ArchiveStore + 'static, evidence: EvidenceLog) -> Self {
        Self {
            store: Box::new(store),
            evidence,
            options: ServiceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    /// Connect the configured backend. Relative evidence dirs resolve against `root`.
    pub fn from_config(config: &Config, root: &Path) -> Result<Self> {
        let backend = config.resolve_backend()?;
        let dal = Dal::connect(backend, &config.backend.url)?;
        let dir = resolve_against(root, &config.evidence.dir);
        Ok(Self::new(dal, EvidenceLog::in_dir(&dir)).with_options(ServiceOptions::from_config(config)))
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.store.backend()
    }

    #[must_use]
    pub const fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    #[must_use]
    pub const fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.store.ensure_schema()
    }

    /// Read `request.path`, compress it and record it as a new tombstone.
    pub fn archive_path(&self, request: ArchivePathRequest) -> Result<ArchiveResult> {
        if !request.path.is_file() {
            return Err(ArchiveError::FileNotFound(request.path));
        }
        let bytes = fs::read(&request.path)?;
        let sha256 = content::digest(&bytes);
        let compressed = content::compress(&bytes, self.options.codec, self.options.level)?;
        let size_bytes = len_i64(bytes.len());
        let compressed_size = len_i64(compressed.len());
        let mime_type = request
            .mime_type
            .clone()
            .unwrap_or_else(|| content::guess_mime(&request.path).to_string());
        let path = request.path.to_string_lossy().into_owned();

        let mut metadata = Map::new();
        metadata.insert("sha256".into(), Value::from(sha256.as_str()));
        metadata.insert("size_bytes".into(), Value::from(size_bytes));
        metadata.insert("compressed_size".into(), Value::from(compressed_size));
        metadata.insert("compression".into(), Value::from(self.options.codec.as_str()));
        metadata.insert("mime_type".into(), Value::from(mime_type.as_str()));
        if let Some(language) = &request.language {
            metadata.insert("language".into(), Value::from(language.as_str()));
        }
        metadata.extend(request.extra_metadata);

        let mut context = Map::new();
        context.insert("source_path".into(), Value::from(path.as_str()));

        let receipt = self.store.record_archive(&ArchiveRequest {
            repo: request.repo.clone(),
            path: path.clone(),
            commit_sha: request.commit_sha,
            language: request.language,
            reason: request.reason,
            kind: request.kind,
            artifact: ArtifactPayload {
                content_sha256: sha256.clone(),
                size_bytes,
                compression: self.options.codec.as_str().to_string(),
                mime_type,
                storage_driver: StorageDriver::Db,
                blob: Some(compressed),
                object_url: None,
            },
            archived_by: request.archived_by.clone(),
            metadata,
            context,
            tags: request.tags,
        })?;

        info!(
            tombstone = %receipt.tombstone_id,
            actor = %request.archived_by,
            repo = %request.repo,
            path = %path,
            size_bytes,
            "archived"
        );
        self.record_evidence(
            &EvidenceRecord::new("ARCHIVE")
                .actor(request.archived_by.as_str())
                .repo(request.repo.as_str())
                .path(path.as_str())
                .tombstone(receipt.tombstone_id.as_str())
                .sha256(sha256.as_str())
                .size(size_bytes)
                .reason(request.reason.as_str())
                .with("compressed_size", compressed_size)
                .with("compression", self.options.codec.as_str()),
        );

        Ok(ArchiveResult {
            tombstone_id: receipt.tombstone_id,
            sha256,
            size_bytes,
            compressed_size,
            repo: request.repo,
            path,
        })
    }

    /// Materialize the archived bytes at `output`. Safe to repeat.
    ///
    /// Any failure is mirrored into the evidence trail as `RESTORE_FAIL`.
    pub fn restore_to_path(&self, tombstone_id: &str, output: &Path, actor: &str) -> Result<PathBuf> {
        match self.restore_inner(tombstone_id, output, actor) {
            Ok(path) => Ok(path),
            Err(err) => {
                let mut record = EvidenceRecord::new("RESTORE_FAIL")
                    .actor(actor)
                    .tombstone(tombstone_id)
                    .reason(sanitize_message(&err.to_string()))
                    .with("output", output.to_string_lossy().as_ref())
                    .with("error_code", err.code().code_string())
                    .with("backend", self.backend().as_str());
                if let Some(url) = &self.options.display_url {
                    record = record.with("backend_url", url.as_str());
                }
                self.record_evidence(&record);
                warn!(tombstone = %tombstone_id, actor, error = %err, "restore failed");
                Err(err)
            }
        }
    }

    fn restore_inner(&self, tombstone_id: &str, output: &Path, actor: &str) -> Result<PathBuf> {
        let started = Instant::now();
        let RestorePayload { item, artifact } = match &self.options.retry {
            Some(policy) => with_retry(policy, || self.store.get_restore_payload(tombstone_id))?,
            None => self.store.get_restore_payload(tombstone_id)?,
        };
        let Some(blob) = artifact.blob.as_deref() else {
            return Err(ArchiveError::ArtifactPurged(tombstone_id.to_string()));
        };

        let decompress_started = Instant::now();
        let bytes = content::decompress(blob, &artifact.compression)?;
        let decompression_ms = elapsed_ms(decompress_started);
        if content::digest(&bytes) != artifact.content_sha256 {
            return Err(ArchiveError::Validation(format!(
                "restored content for {tombstone_id} does not match digest {}",
                artifact.content_sha256
            )));
        }

        let write_started = Instant::now();
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(output, &bytes)?;
        let write_ms = elapsed_ms(write_started);

        self.store.record_restore(tombstone_id, actor)?;

        let mut record = EvidenceRecord::new("RESTORE")
            .actor(actor)
            .repo(item.repo.as_str())
            .path(item.path.as_str())
            .tombstone(tombstone_id)
            .sha256(artifact.content_sha256.as_str())
            .size(artifact.size_bytes)
            .with("output", output.to_string_lossy().as_ref());
        if self.options.enable_metrics {
            record = record
                .with("duration_ms", elapsed_ms(started))
                .with("write_ms", write_ms);
            if self.options.track_decompression {
                record = record.with("decompression_ms", decompression_ms);
            }
        }
        self.record_evidence(&record);

        info!(tombstone = %tombstone_id, actor, output = %output.display(), "restored");
        Ok(output.to_path_buf())
    }

    pub fn list_items(&self, filter: &ListFilter) -> Result<Vec<ItemSummary>> {
        self.store.list_items(filter)
    }

    pub fn show_item(&self, tombstone_id: &str) -> Result<ItemDetail> {
        self.store.show_item(tombstone_id)
    }

    /// Record that `actor` wants this tombstone purged. Authorizes nothing.
    pub fn request_prune(&self, tombstone_id: &str, actor: &str, reason: &str) -> Result<()> {
        self.store.record_prune_request(tombstone_id, actor, reason)?;
        info!(tombstone = %tombstone_id, actor, "prune requested");
        self.record_evidence(
            &EvidenceRecord::new("PRUNE_REQUEST")
                .actor(actor)
                .tombstone(tombstone_id)
                .reason(reason),
        );
        Ok(())
    }

    /// Record a dual-control approval. With `apply`, the shared blob is scrubbed
    /// once every item referencing it has an applied approval.
    pub fn approve_delete(&self, approval: &DeleteApproval) -> Result<bool> {
        let scrubbed = self.store.record_delete_approval(approval)?;
        info!(
            tombstone = %approval.tombstone_id,
            primary = %approval.primary_actor,
            secondary = %approval.secondary_actor,
            apply = approval.apply,
            scrubbed,
            "delete approved"
        );
        self.record_evidence(
            &EvidenceRecord::new("DELETE_APPROVED")
                .actor(approval.primary_actor.as_str())
                .tombstone(approval.tombstone_id.as_str())
                .reason(approval.reason.as_str())
                .with("secondary_actor", approval.secondary_actor.as_str())
                .with("apply", approval.apply)
                .with("blob_scrubbed", scrubbed),
        );
        Ok(scrubbed)
    }

    pub fn add_referent(&self, tombstone_id: &str, ref_type: &str, ref_value: &str) -> Result<()> {
        self.store.add_referent(tombstone_id, ref_type, ref_value)?;
        self.record_evidence(
            &EvidenceRecord::new("REFERENT")
                .tombstone(tombstone_id)
                .with("ref_type", ref_type)
                .with("ref_value", ref_value),
        );
        Ok(())
    }

    pub fn summary(&self) -> Result<ArchiveSummary> {
        self.store.summary()
    }

    /// Cheapest call that still proves the backend is reachable and migrated.
    pub fn probe(&self) -> Result<()> {
        let rows = self.store.list_items(&ListFilter::probe())?;
        debug!(rows = rows.len(), backend = %self.backend(), "probe ok");
        Ok(())
    }

    fn record_evidence(&self, record: &EvidenceRecord) {
        if let Err(err) = self.evidence.append(record) {
            warn!(
                action = %record.action,
                path = %self.evidence.path().display(),
                error = %err,
                "evidence append failed"
            );
        }
    }
}

fn len_i64(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn elapsed_ms(since: Instant) -> f64 {
    (since.elapsed().as_secs_f64() * 1_000_000.0).round() / 1_000.0
}
