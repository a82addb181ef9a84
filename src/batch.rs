//! Batch restore: drive [`ArchiveService::restore_to_path`] over a manifest.
//!
//! Manifests are JSON (`[{...}]` or `{"items": [...]}`) or CSV with a
//! `tombstone,output[,actor]` header. Restores run sequentially in manifest
//! order so a run can be resumed from any index.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BatchConfig;
use crate::error::{ArchiveError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::service::ArchiveService;
use crate::storage::evidence::EvidenceRecord;
use crate::storage::model::{format_timestamp, now};
use crate::utils::paths::resolve_against;
use crate::utils::redact::sanitize_message;

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(alias = "tombstone_id")]
    pub tombstone: String,
    pub output: PathBuf,
    /// Overrides the batch actor for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonManifest {
    List(Vec<ManifestEntry>),
    Wrapped { items: Vec<ManifestEntry> },
}

/// Read a manifest. Relative outputs resolve against the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    if !path.is_file() {
        return Err(ArchiveError::FileNotFound(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path)?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let mut entries = if is_csv || !looks_like_json(&raw) {
        parse_csv(&raw)?
    } else {
        match serde_json::from_str::<JsonManifest>(&raw) {
            Ok(JsonManifest::List(items) | JsonManifest::Wrapped { items }) => items,
            Err(err) => {
                return Err(ArchiveError::Validation(format!(
                    "malformed manifest {}: {err}",
                    path.display()
                )));
            }
        }
    };

    if entries.is_empty() {
        return Err(ArchiveError::Validation(format!(
            "manifest {} has no entries",
            path.display()
        )));
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for (index, entry) in entries.iter_mut().enumerate() {
        if entry.tombstone.trim().is_empty() || entry.output.as_os_str().is_empty() {
            return Err(ArchiveError::Validation(format!(
                "manifest entry {index} needs both tombstone and output"
            )));
        }
        entry.output = resolve_against(base, &entry.output);
    }
    Ok(entries)
}

fn looks_like_json(raw: &str) -> bool {
    matches!(raw.trim_start().chars().next(), Some('[' | '{'))
}

fn parse_csv(raw: &str) -> Result<Vec<ManifestEntry>> {
    let mut lines = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.trim_start().starts_with('#'));

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = split_csv(header).map(|c| c.to_ascii_lowercase()).collect();
    let find = |names: &[&str]| columns.iter().position(|c| names.contains(&c.as_str()));
    let (Some(tombstone_col), Some(output_col)) = (find(&["tombstone", "tombstone_id"]), find(&["output"]))
    else {
        return Err(ArchiveError::Validation(
            "CSV manifest header must name tombstone and output columns".to_string(),
        ));
    };
    let actor_col = find(&["actor"]);

    lines
        .map(|(number, line)| {
            let fields: Vec<String> = split_csv(line).collect();
            let get = |col: usize| fields.get(col).filter(|f| !f.is_empty()).cloned();
            match (get(tombstone_col), get(output_col)) {
                (Some(tombstone), Some(output)) => Ok(ManifestEntry {
                    tombstone,
                    output: PathBuf::from(output),
                    actor: actor_col.and_then(get),
                }),
                _ => Err(ArchiveError::Validation(format!(
                    "CSV manifest line {} is missing tombstone or output",
                    number + 1
                ))),
            }
        })
        .collect()
}

fn split_csv(line: &str) -> impl Iterator<Item = String> + '_ {
    line.split(',')
        .map(|field| field.trim().trim_matches('"').trim().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub item: ManifestEntry,
    pub status: ItemStatus,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_ms: f64,
    pub state: BatchState,
    pub concurrent: u32,
}

/// Progress snapshot handed to the callback.
#[derive(Debug, Clone)]
pub struct BatchProgress<'a> {
    /// Entries processed so far, skipped ones included.
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub last: &'a BatchItemResult,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub continue_on_error: bool,
    pub progress_interval: usize,
    pub concurrent: u32,
    /// Retry for each entry. Ignored when the service has its own retry policy.
    pub retry: Option<RetryPolicy>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            progress_interval: 10,
            concurrent: 1,
            retry: None,
        }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn from_config(batch: &BatchConfig, retry: Option<RetryPolicy>) -> Self {
        Self {
            continue_on_error: batch.continue_on_error,
            progress_interval: usize::try_from(batch.progress_interval).unwrap_or(1).max(1),
            concurrent: batch.concurrent,
            retry,
        }
    }
}

pub type ProgressCallback<'c> = dyn FnMut(&BatchProgress<'_>) + 'c;

pub struct BatchRestore<'a> {
    service: &'a ArchiveService,
    options: BatchOptions,
    state: BatchState,
    results: Vec<BatchItemResult>,
    total_duration_ms: f64,
}

impl<'a> BatchRestore<'a> {
    #[must_use]
    pub const fn new(service: &'a ArchiveService, options: BatchOptions) -> Self {
        Self {
            service,
            options,
            state: BatchState::NotStarted,
            results: Vec::new(),
            total_duration_ms: 0.0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> BatchState {
        self.state
    }

    #[must_use]
    pub fn results(&self) -> &[BatchItemResult] {
        &self.results
    }

    /// Per-item retry, unless the service already retries its payload reads.
    fn item_retry(&self) -> Option<&RetryPolicy> {
        self.options
            .retry
            .as_ref()
            .filter(|_| self.service.options().retry.is_none())
    }

    /// Restore `items[resume_from..]`, recording earlier entries as skipped.
    ///
    /// Without `continue_on_error` the first failure is recorded and then
    /// returned as the error of the whole run.
    pub fn restore(
        &mut self,
        items: &[ManifestEntry],
        actor: &str,
        resume_from: usize,
        mut progress: Option<&mut ProgressCallback<'_>>,
    ) -> Result<BatchSummary> {
        if resume_from > items.len() {
            return Err(ArchiveError::Validation(format!(
                "resume index {resume_from} is past the end of a {}-entry manifest",
                items.len()
            )));
        }
        self.state = BatchState::Running;
        self.results.clear();
        let started = Instant::now();
        info!(total = items.len(), resume_from, actor, "batch restore started");

        let mut first_error = None;
        for (index, entry) in items.iter().enumerate() {
            if index < resume_from {
                self.results.push(BatchItemResult {
                    item: entry.clone(),
                    status: ItemStatus::Skipped,
                    duration_ms: 0.0,
                    error: None,
                    error_code: None,
                });
                continue;
            }

            let item_actor = entry.actor.as_deref().unwrap_or(actor);
            let item_started = Instant::now();
            let outcome = match self.item_retry() {
                Some(policy) => with_retry(policy, || {
                    self.service.restore_to_path(&entry.tombstone, &entry.output, item_actor)
                }),
                None => self.service.restore_to_path(&entry.tombstone, &entry.output, item_actor),
            };
            let duration_ms = round_ms(item_started.elapsed().as_secs_f64() * 1_000.0);

            let (status, error, error_code) = match &outcome {
                Ok(_) => (ItemStatus::Success, None, None),
                Err(err) => {
                    warn!(tombstone = %entry.tombstone, index, error = %err, "batch item failed");
                    (
                        ItemStatus::Failed,
                        Some(sanitize_message(&err.to_string())),
                        Some(err.code().code_string()),
                    )
                }
            };
            self.results.push(BatchItemResult {
                item: entry.clone(),
                status,
                duration_ms,
                error,
                error_code,
            });

            let processed = index + 1;
            let due = processed % self.options.progress_interval.max(1) == 0 || processed == items.len();
            if let (true, Some(callback), Some(last)) =
                (due, progress.as_deref_mut(), self.results.last())
            {
                callback(&BatchProgress {
                    processed,
                    total: items.len(),
                    succeeded: self.count(ItemStatus::Success),
                    failed: self.count(ItemStatus::Failed),
                    last,
                });
            }

            if let Err(err) = outcome {
                if !self.options.continue_on_error {
                    first_error = Some(err);
                    break;
                }
            }
        }

        self.total_duration_ms = round_ms(started.elapsed().as_secs_f64() * 1_000.0);
        self.state = if self.count(ItemStatus::Failed) > 0 {
            BatchState::Failed
        } else {
            BatchState::Completed
        };
        let summary = self.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.total_duration_ms,
            "batch restore finished"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.results.len(),
            succeeded: self.count(ItemStatus::Success),
            failed: self.count(ItemStatus::Failed),
            skipped: self.count(ItemStatus::Skipped),
            total_duration_ms: self.total_duration_ms,
            state: self.state,
            concurrent: self.options.concurrent,
        }
    }

    fn count(&self, status: ItemStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Write `{items, summary}` to `path` and append `BATCH_RESTORE_COMPLETE` evidence.
    pub fn save_results(&self, path: &Path, actor: &str) -> Result<BatchSummary> {
        let summary = self.summary();
        let document = serde_json::json!({
            "generated_at": format_timestamp(now()),
            "items": self.results,
            "summary": summary,
        });
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&document)?)?;

        self.service.evidence().append(
            &EvidenceRecord::new("BATCH_RESTORE_COMPLETE")
                .actor(actor)
                .with("results_path", path.to_string_lossy().as_ref())
                .with("total", summary.total)
                .with("succeeded", summary.succeeded)
                .with("failed", summary.failed)
                .with("skipped", summary.skipped)
                .with("total_duration_ms", summary.total_duration_ms),
        )?;
        Ok(summary)
    }
}

fn round_ms(ms: f64) -> f64 {
    (ms * 1_000.0).round() / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ArchivePathRequest;
    use crate::storage::evidence::EvidenceLog;
    use crate::storage::model::ArchiveReason;
    use crate::service::ServiceOptions;
    use crate::storage::dal::ArchiveStore;
    use crate::storage::model::{
        ArchiveReceipt, ArchiveRequest, ArchiveSummary, DeleteApproval, ItemDetail, ItemSummary,
        ListFilter, RestorePayload,
    };
    use crate::storage::schema::Backend;
    use crate::storage::sqlite::SqliteDal;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn setup(dir: &TempDir, files: &[(&str, &str)]) -> (ArchiveService, Vec<String>) {
        let dal = SqliteDal::open_path(dir.path().join("a.sqlite")).unwrap();
        let svc = ArchiveService::new(dal, EvidenceLog::in_dir(&dir.path().join("ev")));
        svc.ensure_schema().unwrap();
        let tombstones = files
            .iter()
            .map(|(name, body)| {
                let path = dir.path().join(name);
                fs::write(&path, body).unwrap();
                svc.archive_path(ArchivePathRequest::new("r", &path, ArchiveReason::Dead, "alice", "c"))
                    .unwrap()
                    .tombstone_id
            })
            .collect();
        (svc, tombstones)
    }

    fn entry(tombstone: &str, output: PathBuf) -> ManifestEntry {
        ManifestEntry {
            tombstone: tombstone.to_string(),
            output,
            actor: None,
        }
    }

    /// Store whose payload reads always fail transiently.
    struct FlakyStore {
        reads: Arc<AtomicUsize>,
    }

    impl ArchiveStore for FlakyStore {
        fn backend(&self) -> Backend {
            Backend::Sqlite
        }
        fn ensure_schema(&self) -> Result<()> {
            Ok(())
        }
        fn record_archive(&self, _: &ArchiveRequest) -> Result<ArchiveReceipt> {
            unreachable!()
        }
        fn get_restore_payload(&self, _: &str) -> Result<RestorePayload> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(ArchiveError::Transient("connection reset".into()))
        }
        fn record_restore(&self, _: &str, _: &str) -> Result<()> {
            unreachable!()
        }
        fn record_prune_request(&self, _: &str, _: &str, _: &str) -> Result<()> {
            unreachable!()
        }
        fn record_delete_approval(&self, _: &DeleteApproval) -> Result<bool> {
            unreachable!()
        }
        fn list_items(&self, _: &ListFilter) -> Result<Vec<ItemSummary>> {
            unreachable!()
        }
        fn show_item(&self, _: &str) -> Result<ItemDetail> {
            unreachable!()
        }
        fn add_referent(&self, _: &str, _: &str, _: &str) -> Result<()> {
            unreachable!()
        }
        fn summary(&self) -> Result<ArchiveSummary> {
            unreachable!()
        }
    }

    #[test]
    fn transient_failures_are_retried_by_one_layer_only() {
        let dir = TempDir::new().unwrap();
        let reads = Arc::new(AtomicUsize::new(0));
        let svc = ArchiveService::new(
            FlakyStore { reads: Arc::clone(&reads) },
            EvidenceLog::in_dir(&dir.path().join("ev")),
        )
        .with_options(ServiceOptions {
            retry: Some(RetryPolicy::immediate(3)),
            ..ServiceOptions::default()
        });
        let items = vec![
            entry("t-1", dir.path().join("one")),
            entry("t-2", dir.path().join("two")),
        ];
        let options = BatchOptions {
            continue_on_error: true,
            retry: Some(RetryPolicy::immediate(3)),
            ..BatchOptions::default()
        };

        let mut batch = BatchRestore::new(&svc, options);
        let summary = batch.restore(&items, "bob", 0, None).unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(reads.load(Ordering::SeqCst), 6);

        let failures = fs::read_to_string(svc.evidence().path())
            .unwrap()
            .lines()
            .filter(|line| line.contains("\"RESTORE_FAIL\""))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn batch_retries_when_the_service_does_not() {
        let dir = TempDir::new().unwrap();
        let reads = Arc::new(AtomicUsize::new(0));
        let svc = ArchiveService::new(
            FlakyStore { reads: Arc::clone(&reads) },
            EvidenceLog::in_dir(&dir.path().join("ev")),
        );
        let options = BatchOptions {
            retry: Some(RetryPolicy::immediate(2)),
            ..BatchOptions::default()
        };

        let mut batch = BatchRestore::new(&svc, options);
        let err = batch
            .restore(&[entry("t-1", dir.path().join("one"))], "bob", 0, None)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Transient(_)));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn restores_all_entries_in_order() {
        let dir = TempDir::new().unwrap();
        let (svc, ids) = setup(&dir, &[("a.txt", "A"), ("b.txt", "B")]);
        let items = vec![
            entry(&ids[0], dir.path().join("out/a.txt")),
            entry(&ids[1], dir.path().join("out/b.txt")),
        ];
        let mut batch = BatchRestore::new(&svc, BatchOptions::default());
        let summary = batch.restore(&items, "bob", 0, None).unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(batch.state(), BatchState::Completed);
        assert_eq!(fs::read_to_string(dir.path().join("out/b.txt")).unwrap(), "B");
    }

    #[test]
    fn first_failure_stops_by_default() {
        let dir = TempDir::new().unwrap();
        let (svc, ids) = setup(&dir, &[("a.txt", "A")]);
        let items = vec![
            entry("missing", dir.path().join("x")),
            entry(&ids[0], dir.path().join("a.out")),
        ];
        let mut batch = BatchRestore::new(&svc, BatchOptions::default());
        let err = batch.restore(&items, "bob", 0, None).unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownTombstone(_)));
        assert_eq!(batch.results().len(), 1);
        assert_eq!(batch.results()[0].status, ItemStatus::Failed);
        assert_eq!(batch.state(), BatchState::Failed);
        assert!(!dir.path().join("a.out").exists());
    }

    #[test]
    fn continue_on_error_records_and_proceeds() {
        let dir = TempDir::new().unwrap();
        let (svc, ids) = setup(&dir, &[("a.txt", "A")]);
        let items = vec![
            entry("missing", dir.path().join("x")),
            entry(&ids[0], dir.path().join("a.out")),
        ];
        let options = BatchOptions {
            continue_on_error: true,
            progress_interval: 1,
            ..BatchOptions::default()
        };
        let mut calls = 0;
        let mut on_progress = |_: &BatchProgress<'_>| calls += 1;
        let callback: &mut ProgressCallback<'_> = &mut on_progress;
        let mut batch = BatchRestore::new(&svc, options);
        let summary = batch.restore(&items, "bob", 0, Some(callback)).unwrap();
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(calls, 2);
        assert_eq!(batch.results()[0].error_code.as_deref(), Some("E101"));
    }

    #[test]
    fn resume_skips_earlier_entries_and_saves_results() {
        let dir = TempDir::new().unwrap();
        let (svc, ids) = setup(&dir, &[("a.txt", "A"), ("b.txt", "B")]);
        let items = vec![
            entry(&ids[0], dir.path().join("a.out")),
            entry(&ids[1], dir.path().join("b.out")),
        ];
        let mut batch = BatchRestore::new(&svc, BatchOptions::default());
        let summary = batch.restore(&items, "bob", 1, None).unwrap();
        assert_eq!((summary.skipped, summary.succeeded), (1, 1));
        assert!(!dir.path().join("a.out").exists());

        let results = dir.path().join("results/batch.json");
        batch.save_results(&results, "bob").unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&fs::read(&results).unwrap()).unwrap();
        assert_eq!(doc["summary"]["skipped"], 1);
        assert_eq!(doc["items"].as_array().unwrap().len(), 2);
        let evidence = fs::read_to_string(svc.evidence().path()).unwrap();
        assert!(evidence.lines().last().unwrap().contains("BATCH_RESTORE_COMPLETE"));
    }

    #[test]
    fn resume_past_end_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (svc, ids) = setup(&dir, &[("a.txt", "A")]);
        let items = vec![entry(&ids[0], dir.path().join("a.out"))];
        let mut batch = BatchRestore::new(&svc, BatchOptions::default());
        assert!(batch.restore(&items, "bob", 5, None).is_err());
    }

    #[test]
    fn json_manifests_in_both_shapes() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("m1.json");
        fs::write(&list, r#"[{"tombstone": "t1", "output": "out/a.txt"}]"#).unwrap();
        let wrapped = dir.path().join("m2.json");
        fs::write(
            &wrapped,
            r#"{"items": [{"tombstone_id": "t2", "output": "/abs/b.txt", "actor": "eve"}]}"#,
        )
        .unwrap();

        let first = load_manifest(&list).unwrap();
        assert_eq!(first[0].output, dir.path().join("out/a.txt"));
        let second = load_manifest(&wrapped).unwrap();
        assert_eq!(second[0].tombstone, "t2");
        assert_eq!(second[0].output, PathBuf::from("/abs/b.txt"));
        assert_eq!(second[0].actor.as_deref(), Some("eve"));
    }

    #[test]
    fn csv_manifest_with_actor_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.csv");
        fs::write(&path, "tombstone,output,actor\n# comment\nt1,a.txt,\n\"t2\", b.txt , eve\n").unwrap();
        let entries = load_manifest(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].actor, None);
        assert_eq!(entries[1].tombstone, "t2");
        assert_eq!(entries[1].output, dir.path().join("b.txt"));
        assert_eq!(entries[1].actor.as_deref(), Some("eve"));
    }

    #[test]
    fn empty_or_malformed_manifests_fail_validation() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("e.json");
        fs::write(&empty, "[]").unwrap();
        assert!(matches!(load_manifest(&empty), Err(ArchiveError::Validation(_))));

        let bad = dir.path().join("b.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(load_manifest(&bad), Err(ArchiveError::Validation(_))));

        let headerless = dir.path().join("h.csv");
        fs::write(&headerless, "t1,a.txt\n").unwrap();
        assert!(matches!(load_manifest(&headerless), Err(ArchiveError::Validation(_))));

        assert!(matches!(
            load_manifest(&dir.path().join("nope.json")),
            Err(ArchiveError::FileNotFound(_))
        ));
    }
}
