//! SQLite archive backend.
//!
//! One connection behind a mutex. Every multi-statement call runs in an
//! `IMMEDIATE` transaction so the artifact dedup check and insert cannot
//! interleave with another writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::storage::dal::ArchiveStore;
use crate::storage::model::{
    ArchiveReceipt, ArchiveRequest, ArchiveSummary, ArtifactPayload, ArtifactRecord,
    DeleteApproval, EventAction, EventRecord, ItemDetail, ItemRecord, ItemSummary, ListFilter,
    PURGE_SENTINEL_URL, PurgeOutcome, Referent, RestorePayload, Retention, StorageDriver,
    format_timestamp, new_event_id, new_id, now, parse_json_map, parse_timestamp,
};
use crate::storage::schema::Backend;

const ITEM_COLUMNS: &str = "id, tombstone_id, repo, path, commit_sha, language, kind, reason, \
     artifact_id, metadata, archived_by, archived_at, legal_hold, delete_after, restored_at";

const ARTIFACT_COLUMNS: &str = "id, content_sha256, size_bytes, compression, mime_type, \
     storage_driver, blob_bytes, object_url, created_at";

/// Where a `sqlite:` URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl SqliteTarget {
    /// `sqlite:///rel/path`, `sqlite:////abs/path`, `sqlite://path`, a bare path, or `:memory:`.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        match rest {
            "" => Err(ArchiveError::Config(format!("SQLite URL has no path: '{url}'"))),
            ":memory:" => Ok(Self::Memory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

/// SQLite implementation of [`ArchiveStore`].
pub struct SqliteDal {
    conn: Mutex<Connection>,
    target: SqliteTarget,
}

impl std::fmt::Debug for SqliteDal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDal")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl SqliteDal {
    /// Open the database a `sqlite:` URL points at, creating parent directories.
    pub fn open(url: &str) -> Result<Self> {
        let target = SqliteTarget::parse(url)?;
        let conn = match &target {
            SqliteTarget::Memory => Connection::open_in_memory()?,
            SqliteTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
        };
        Self::configure_pragmas(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            target,
        })
    }

    /// Open a database file directly.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&path.as_ref().to_string_lossy())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl ArchiveStore for SqliteDal {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn ensure_schema(&self) -> Result<()> {
        let statements = Backend::Sqlite.statements();
        let mut conn = self.conn.lock();
        // journal_mode cannot change inside a transaction
        for pragma in statements.iter().filter(|s| s.starts_with("PRAGMA")) {
            conn.execute_batch(pragma)?;
        }
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for ddl in statements.iter().filter(|s| !s.starts_with("PRAGMA")) {
            tx.execute_batch(ddl)?;
        }
        tx.commit()?;
        debug!(db = ?self.target, "sqlite schema ensured");
        Ok(())
    }

    fn record_archive(&self, request: &ArchiveRequest) -> Result<ArchiveReceipt> {
        let mut metadata = request.metadata.clone();
        let retention = Retention::take_from(&mut metadata)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let context_json = serde_json::to_string(&request.context)?;

        self.with_tx(|tx| {
            let artifact_id = upsert_artifact(tx, &request.artifact)?;
            let item_id = new_id();
            let tombstone_id = new_id();
            let archived_at = format_timestamp(now());

            tx.execute(
                &format!(
                    "INSERT INTO item ({ITEM_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL)"
                ),
                params![
                    item_id,
                    tombstone_id,
                    request.repo,
                    request.path,
                    request.commit_sha,
                    request.language,
                    request.kind.as_str(),
                    request.reason.as_str(),
                    artifact_id,
                    metadata_json,
                    request.archived_by,
                    archived_at,
                    retention.legal_hold,
                    retention.delete_after.map(format_timestamp),
                ],
            )?;
            insert_event(
                tx,
                &item_id,
                EventAction::Archive,
                &request.archived_by,
                &context_json,
                &archived_at,
            )?;
            for tag in request.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
                tx.execute(
                    "INSERT OR IGNORE INTO tag (item_id, tag) VALUES (?1, ?2)",
                    params![item_id, tag],
                )?;
            }

            Ok(ArchiveReceipt {
                tombstone_id,
                artifact_id,
                item_id,
            })
        })
    }

    fn get_restore_payload(&self, tombstone_id: &str) -> Result<RestorePayload> {
        self.with_conn(|conn| {
            let item = find_item(conn, tombstone_id)?
                .ok_or_else(|| ArchiveError::UnknownTombstone(tombstone_id.to_string()))?;
            let artifact = conn
                .query_row(
                    &format!("SELECT {ARTIFACT_COLUMNS} FROM artifact WHERE id = ?1"),
                    [&item.artifact_id],
                    |row| Ok(artifact_from_row(row)),
                )
                .optional()?
                .transpose()?
                .ok_or_else(|| ArchiveError::UnknownArtifact(item.artifact_id.clone()))?;
            Ok(RestorePayload { item, artifact })
        })
    }

    fn record_restore(&self, tombstone_id: &str, actor: &str) -> Result<()> {
        self.with_tx(|tx| {
            let item_id = item_id_for(tx, tombstone_id)?;
            let ts = format_timestamp(now());
            tx.execute(
                "UPDATE item SET restored_at = ?1 WHERE id = ?2",
                params![ts, item_id],
            )?;
            insert_event(tx, &item_id, EventAction::Restore, actor, "{}", &ts)
        })
    }

    fn record_prune_request(&self, tombstone_id: &str, actor: &str, reason: &str) -> Result<()> {
        let mut context = Map::new();
        context.insert("reason".into(), Value::from(reason));
        let context_json = serde_json::to_string(&context)?;
        self.with_tx(|tx| {
            let item_id = item_id_for(tx, tombstone_id)?;
            let ts = format_timestamp(now());
            insert_event(tx, &item_id, EventAction::PruneRequest, actor, &context_json, &ts)
        })
    }

    fn record_delete_approval(&self, approval: &DeleteApproval) -> Result<bool> {
        approval.validate()?;
        self.with_tx(|tx| {
            let (item_id, artifact_id, legal_hold): (String, String, bool) = tx
                .query_row(
                    "SELECT id, artifact_id, legal_hold FROM item WHERE tombstone_id = ?1",
                    [&approval.tombstone_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?
                .ok_or_else(|| ArchiveError::UnknownTombstone(approval.tombstone_id.clone()))?;
            if legal_hold {
                return Err(ArchiveError::LegalHoldViolation(approval.tombstone_id.clone()));
            }

            let ts = format_timestamp(now());
            let outcome = if approval.apply {
                tx.execute(
                    "UPDATE item SET purge_approved_at = COALESCE(purge_approved_at, ?1) WHERE id = ?2",
                    params![ts, item_id],
                )?;
                let unpurged_siblings: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM item \
                     WHERE artifact_id = ?1 AND id <> ?2 AND purge_approved_at IS NULL",
                    params![artifact_id, item_id],
                    |row| row.get(0),
                )?;
                Some(PurgeOutcome { unpurged_siblings })
            } else {
                None
            };

            for (actor, context) in approval.event_contexts(outcome) {
                let context_json = serde_json::to_string(&context)?;
                insert_event(tx, &item_id, EventAction::DeleteApproved, &actor, &context_json, &ts)?;
            }

            let scrubbed = outcome.is_some_and(|o| o.scrubbed());
            if scrubbed {
                tx.execute(
                    "UPDATE artifact SET blob_bytes = NULL, storage_driver = ?1, \
                     object_url = COALESCE(object_url, ?2) WHERE id = ?3",
                    params![StorageDriver::Object.as_str(), PURGE_SENTINEL_URL, artifact_id],
                )?;
            }
            Ok(scrubbed)
        })
    }

    fn list_items(&self, filter: &ListFilter) -> Result<Vec<ItemSummary>> {
        if filter.limit == 0 {
            // still touch the table so an unreachable or uninitialised archive errors
            return self.with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM item WHERE 1 = 0", [], |row| {
                    row.get::<_, i64>(0)
                })?;
                Ok(Vec::new())
            });
        }
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, tombstone_id, repo, path, commit_sha, reason, archived_by, archived_at \
                 FROM item WHERE 1 = 1",
            );
            let mut args: Vec<String> = Vec::new();
            if let Some(repo) = &filter.repo {
                args.push(repo.clone());
                sql.push_str(&format!(" AND repo = ?{}", args.len()));
            }
            if let Some(since) = filter.since {
                args.push(format_timestamp(since));
                sql.push_str(&format!(" AND archived_at >= ?{}", args.len()));
            }
            sql.push_str(&format!(
                " ORDER BY archived_at DESC, id DESC LIMIT {}",
                filter.limit
            ));

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(ItemSummary {
                    id: row.get(0)?,
                    tombstone_id: row.get(1)?,
                    repo: row.get(2)?,
                    path: row.get(3)?,
                    commit_sha: row.get(4)?,
                    reason: row.get::<_, String>(5)?.parse()?,
                    archived_by: row.get(6)?,
                    archived_at: parse_timestamp(&row.get::<_, String>(7)?)?,
                });
            }
            Ok(results)
        })
    }

    fn show_item(&self, tombstone_id: &str) -> Result<ItemDetail> {
        self.with_conn(|conn| {
            let item = find_item(conn, tombstone_id)?
                .ok_or_else(|| ArchiveError::UnknownTombstone(tombstone_id.to_string()))?;

            let mut stmt = conn.prepare(
                "SELECT action, actor, context, created_at FROM event \
                 WHERE item_id = ?1 ORDER BY created_at, id",
            )?;
            let mut rows = stmt.query([&item.id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(EventRecord {
                    action: row.get::<_, String>(0)?.parse()?,
                    actor: row.get(1)?,
                    context: parse_json_map(row.get::<_, Option<String>>(2)?.as_deref())?,
                    created_at: parse_timestamp(&row.get::<_, String>(3)?)?,
                });
            }

            let mut stmt = conn.prepare("SELECT tag FROM tag WHERE item_id = ?1 ORDER BY tag")?;
            let tags = stmt
                .query_map([&item.id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;

            let mut stmt = conn.prepare(
                "SELECT ref_type, ref_value FROM referent WHERE item_id = ?1 \
                 ORDER BY ref_type, ref_value",
            )?;
            let referents = stmt
                .query_map([&item.id], |row| {
                    Ok(Referent {
                        ref_type: row.get(0)?,
                        ref_value: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(ItemDetail {
                item,
                events,
                tags,
                referents,
            })
        })
    }

    fn add_referent(&self, tombstone_id: &str, ref_type: &str, ref_value: &str) -> Result<()> {
        self.with_tx(|tx| {
            let item_id = item_id_for(tx, tombstone_id)?;
            tx.execute(
                "INSERT OR IGNORE INTO referent (item_id, ref_type, ref_value) VALUES (?1, ?2, ?3)",
                params![item_id, ref_type, ref_value],
            )?;
            Ok(())
        })
    }

    fn summary(&self) -> Result<ArchiveSummary> {
        self.with_conn(|conn| {
            let (count, total_bytes) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(a.size_bytes), 0) \
                 FROM item i JOIN artifact a ON a.id = i.artifact_id",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(ArchiveSummary { count, total_bytes })
        })
    }
}

fn upsert_artifact(tx: &Transaction<'_>, payload: &ArtifactPayload) -> Result<String> {
    let existing = match find_artifact_by_sha(tx, &payload.content_sha256)? {
        Some(found) => found,
        None => {
            let id = new_id();
            let inserted = tx.execute(
                &format!(
                    "INSERT INTO artifact ({ARTIFACT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(content_sha256) DO NOTHING"
                ),
                params![
                    id,
                    payload.content_sha256,
                    payload.size_bytes,
                    payload.compression,
                    payload.mime_type,
                    payload.storage_driver.as_str(),
                    payload.blob,
                    payload.object_url,
                    format_timestamp(now()),
                ],
            )?;
            if inserted == 1 {
                return Ok(id);
            }
            find_artifact_by_sha(tx, &payload.content_sha256)?
                .ok_or_else(|| ArchiveError::UnknownArtifact(payload.content_sha256.clone()))?
        }
    };

    if payload.differs_from(&existing) {
        debug!(artifact = %existing.id, "refreshing artifact row from incoming payload");
        tx.execute(
            "UPDATE artifact SET size_bytes = ?1, compression = ?2, mime_type = ?3, \
             storage_driver = ?4, blob_bytes = ?5, object_url = ?6 WHERE id = ?7",
            params![
                payload.size_bytes,
                payload.compression,
                payload.mime_type,
                payload.storage_driver.as_str(),
                payload.blob,
                payload.object_url,
                existing.id,
            ],
        )?;
    }
    Ok(existing.id)
}

fn find_artifact_by_sha(conn: &Connection, sha: &str) -> Result<Option<ArtifactRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifact WHERE content_sha256 = ?1"
    ))?;
    let mut rows = stmt.query([sha])?;
    match rows.next()? {
        Some(row) => Ok(Some(artifact_from_row(row)?)),
        None => Ok(None),
    }
}

fn find_item(conn: &Connection, tombstone_id: &str) -> Result<Option<ItemRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM item WHERE tombstone_id = ?1"
    ))?;
    let mut rows = stmt.query([tombstone_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(item_from_row(row)?)),
        None => Ok(None),
    }
}

fn item_id_for(conn: &Connection, tombstone_id: &str) -> Result<String> {
    conn.query_row(
        "SELECT id FROM item WHERE tombstone_id = ?1",
        [tombstone_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| ArchiveError::UnknownTombstone(tombstone_id.to_string()))
}

fn insert_event(
    conn: &Connection,
    item_id: &str,
    action: EventAction,
    actor: &str,
    context_json: &str,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO event (id, item_id, action, actor, context, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new_event_id(),
            item_id,
            action.as_str(),
            actor,
            context_json,
            created_at
        ],
    )?;
    Ok(())
}

fn artifact_from_row(row: &Row<'_>) -> Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get(0)?,
        content_sha256: row.get(1)?,
        size_bytes: row.get(2)?,
        compression: row.get(3)?,
        mime_type: row.get(4)?,
        storage_driver: row.get::<_, String>(5)?.parse()?,
        blob: row.get(6)?,
        object_url: row.get(7)?,
        created_at: parse_timestamp(&row.get::<_, String>(8)?)?,
    })
}

fn item_from_row(row: &Row<'_>) -> Result<ItemRecord> {
    let retention = Retention {
        legal_hold: row.get::<_, i64>(12)? != 0,
        delete_after: row
            .get::<_, Option<String>>(13)?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    };
    let mut metadata = parse_json_map(row.get::<_, Option<String>>(9)?.as_deref())?;
    retention.echo_into(&mut metadata);

    Ok(ItemRecord {
        id: row.get(0)?,
        tombstone_id: row.get(1)?,
        repo: row.get(2)?,
        path: row.get(3)?,
        commit_sha: row.get(4)?,
        language: row.get(5)?,
        kind: row.get::<_, String>(6)?.parse()?,
        reason: row.get::<_, String>(7)?.parse()?,
        artifact_id: row.get(8)?,
        metadata,
        archived_by: row.get(10)?,
        archived_at: parse_timestamp(&row.get::<_, String>(11)?)?,
        legal_hold: retention.legal_hold,
        delete_after: retention.delete_after,
        restored_at: row
            .get::<_, Option<String>>(14)?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::{ArchiveReason, ItemKind};
    use tempfile::tempdir;

    fn payload(content: &[u8]) -> ArtifactPayload {
        ArtifactPayload {
            content_sha256: crate::storage::content::digest(content),
            size_bytes: i64::try_from(content.len()).unwrap(),
            compression: "zstd".into(),
            mime_type: "text/x-python".into(),
            storage_driver: StorageDriver::Db,
            blob: Some(content.to_vec()),
            object_url: None,
        }
    }

    fn request(path: &str, content: &[u8]) -> ArchiveRequest {
        ArchiveRequest {
            repo: "demo-repo".into(),
            path: path.into(),
            commit_sha: "abc123".into(),
            language: Some("python".into()),
            reason: ArchiveReason::Dead,
            kind: ItemKind::Code,
            artifact: payload(content),
            archived_by: "alice".into(),
            metadata: Map::new(),
            context: Map::new(),
            tags: vec!["cleanup".into(), "cleanup".into(), " ".into()],
        }
    }

    fn dal() -> SqliteDal {
        let dal = SqliteDal::open_in_memory().unwrap();
        dal.ensure_schema().unwrap();
        dal
    }

    fn count(dal: &SqliteDal, sql: &str) -> i64 {
        dal.with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_url_parsing() {
        assert_eq!(
            SqliteTarget::parse("sqlite:///./.tomb/archive.sqlite").unwrap(),
            SqliteTarget::File(PathBuf::from("./.tomb/archive.sqlite"))
        );
        assert_eq!(
            SqliteTarget::parse("sqlite:////tmp/a.db").unwrap(),
            SqliteTarget::File(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(SqliteTarget::parse("sqlite:///:memory:").unwrap(), SqliteTarget::Memory);
        assert!(SqliteTarget::parse("sqlite:///").is_err());
    }

    #[test]
    fn test_schema_is_idempotent_and_uses_wal() {
        let dir = tempdir().unwrap();
        let dal = SqliteDal::open_path(dir.path().join("nested/archive.sqlite")).unwrap();
        dal.ensure_schema().unwrap();
        dal.ensure_schema().unwrap();
        let mode: String = dal
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_archive_writes_item_event_and_deduplicated_tags() {
        let dal = dal();
        let receipt = dal.record_archive(&request("src/old.py", b"print(1)")).unwrap();

        let detail = dal.show_item(&receipt.tombstone_id).unwrap();
        assert_eq!(detail.item.id, receipt.item_id);
        assert_eq!(detail.events.len(), 1);
        assert_eq!(detail.events[0].action, EventAction::Archive);
        assert_eq!(detail.events[0].actor, "alice");
        assert_eq!(detail.tags, vec!["cleanup".to_string()]);
        assert!(!detail.item.legal_hold);
    }

    #[test]
    fn test_identical_content_shares_one_artifact() {
        let dal = dal();
        let a = dal.record_archive(&request("a.py", b"same")).unwrap();
        let b = dal.record_archive(&request("b.py", b"same")).unwrap();
        assert_ne!(a.tombstone_id, b.tombstone_id);
        assert_eq!(a.artifact_id, b.artifact_id);
        assert_eq!(count(&dal, "SELECT COUNT(*) FROM artifact"), 1);
        assert_eq!(count(&dal, "SELECT COUNT(*) FROM item"), 2);
    }

    #[test]
    fn test_unknown_tombstone() {
        let dal = dal();
        assert!(matches!(
            dal.get_restore_payload("missing"),
            Err(ArchiveError::UnknownTombstone(_))
        ));
        assert!(matches!(
            dal.record_restore("missing", "bob"),
            Err(ArchiveError::UnknownTombstone(_))
        ));
        assert!(matches!(dal.show_item("missing"), Err(ArchiveError::UnknownTombstone(_))));
    }

    #[test]
    fn test_restore_is_repeatable_and_logged() {
        let dal = dal();
        let receipt = dal.record_archive(&request("a.py", b"x")).unwrap();
        dal.record_restore(&receipt.tombstone_id, "bob").unwrap();
        dal.record_restore(&receipt.tombstone_id, "bob").unwrap();
        let detail = dal.show_item(&receipt.tombstone_id).unwrap();
        let restores = detail
            .events
            .iter()
            .filter(|e| e.action == EventAction::Restore)
            .count();
        assert_eq!(restores, 2);
        assert!(detail.item.restored_at.is_some());
    }

    #[test]
    fn test_purge_scrubs_sole_reference() {
        let dal = dal();
        let receipt = dal.record_archive(&request("a.py", b"only")).unwrap();
        let approval = DeleteApproval {
            tombstone_id: receipt.tombstone_id.clone(),
            primary_actor: "alice".into(),
            secondary_actor: "bob".into(),
            reason: "obsolete".into(),
            apply: true,
        };
        assert!(dal.record_delete_approval(&approval).unwrap());

        let payload = dal.get_restore_payload(&receipt.tombstone_id).unwrap();
        assert!(payload.artifact.is_purged());
        assert_eq!(payload.artifact.storage_driver, StorageDriver::Object);
        assert_eq!(payload.artifact.object_url.as_deref(), Some(PURGE_SENTINEL_URL));

        let events = dal.show_item(&receipt.tombstone_id).unwrap().events;
        let approvals: Vec<_> = events
            .iter()
            .filter(|e| e.action == EventAction::DeleteApproved)
            .collect();
        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[0].context["role"], "primary");
        assert_eq!(approvals[1].context["role"], "secondary");
        assert_eq!(approvals[0].context["blob_scrubbed"], true);
    }

    #[test]
    fn test_purge_without_apply_keeps_blob() {
        let dal = dal();
        let receipt = dal.record_archive(&request("a.py", b"keep")).unwrap();
        let approval = DeleteApproval {
            tombstone_id: receipt.tombstone_id.clone(),
            primary_actor: "alice".into(),
            secondary_actor: "bob".into(),
            reason: "later".into(),
            apply: false,
        };
        assert!(!dal.record_delete_approval(&approval).unwrap());
        assert!(!dal.get_restore_payload(&receipt.tombstone_id).unwrap().artifact.is_purged());
        assert_eq!(count(&dal, "SELECT COUNT(*) FROM event WHERE action = 'DELETE_APPROVED'"), 2);
    }

    fn applied(tombstone_id: &str) -> DeleteApproval {
        DeleteApproval {
            tombstone_id: tombstone_id.to_string(),
            primary_actor: "alice".into(),
            secondary_actor: "bob".into(),
            reason: "obsolete".into(),
            apply: true,
        }
    }

    #[test]
    fn test_purge_of_one_sharer_keeps_blob_for_the_other() {
        let dal = dal();
        let a = dal.record_archive(&request("a.py", b"shared")).unwrap();
        let b = dal.record_archive(&request("b.py", b"shared")).unwrap();

        assert!(!dal.record_delete_approval(&applied(&a.tombstone_id)).unwrap());
        let payload = dal.get_restore_payload(&b.tombstone_id).unwrap();
        assert!(!payload.artifact.is_purged());
        assert_eq!(payload.artifact.blob.as_deref(), Some(&b"shared"[..]));
        assert_eq!(
            count(&dal, "SELECT COUNT(*) FROM item WHERE purge_approved_at IS NOT NULL"),
            1
        );

        let events = dal.show_item(&a.tombstone_id).unwrap().events;
        let primary = events
            .iter()
            .find(|e| e.action == EventAction::DeleteApproved)
            .unwrap();
        assert_eq!(primary.context["blob_scrubbed"], false);
        assert_eq!(primary.context["shared_references"], 1);
    }

    #[test]
    fn test_blob_scrubbed_once_every_sharer_is_purged() {
        let dal = dal();
        let a = dal.record_archive(&request("a.py", b"shared")).unwrap();
        let b = dal.record_archive(&request("b.py", b"shared")).unwrap();

        assert!(!dal.record_delete_approval(&applied(&a.tombstone_id)).unwrap());
        // approving the same item again does not count as a second sharer
        assert!(!dal.record_delete_approval(&applied(&a.tombstone_id)).unwrap());
        assert!(dal.record_delete_approval(&applied(&b.tombstone_id)).unwrap());

        for tombstone in [&a.tombstone_id, &b.tombstone_id] {
            assert!(dal.get_restore_payload(tombstone).unwrap().artifact.is_purged());
        }
        assert_eq!(count(&dal, "SELECT COUNT(*) FROM artifact WHERE blob_bytes IS NULL"), 1);
    }

    #[test]
    fn test_non_applied_approval_does_not_count_towards_scrub() {
        let dal = dal();
        let a = dal.record_archive(&request("a.py", b"shared")).unwrap();
        let b = dal.record_archive(&request("b.py", b"shared")).unwrap();

        let mut dry_run = applied(&a.tombstone_id);
        dry_run.apply = false;
        assert!(!dal.record_delete_approval(&dry_run).unwrap());
        assert!(!dal.record_delete_approval(&applied(&b.tombstone_id)).unwrap());
        assert!(!dal.get_restore_payload(&a.tombstone_id).unwrap().artifact.is_purged());
    }

    #[test]
    fn test_legal_hold_blocks_purge_and_writes_nothing() {
        let dal = dal();
        let mut req = request("held.py", b"held");
        req.metadata.insert("legal_hold".into(), Value::Bool(true));
        let receipt = dal.record_archive(&req).unwrap();

        let approval = DeleteApproval {
            tombstone_id: receipt.tombstone_id.clone(),
            primary_actor: "alice".into(),
            secondary_actor: "bob".into(),
            reason: "x".into(),
            apply: true,
        };
        assert!(matches!(
            dal.record_delete_approval(&approval),
            Err(ArchiveError::LegalHoldViolation(_))
        ));
        assert_eq!(count(&dal, "SELECT COUNT(*) FROM event"), 1);
        assert!(!dal.get_restore_payload(&receipt.tombstone_id).unwrap().artifact.is_purged());
    }

    #[test]
    fn test_resurrection_repopulates_scrubbed_blob() {
        let dal = dal();
        let first = dal.record_archive(&request("a.py", b"revive")).unwrap();
        dal.record_delete_approval(&DeleteApproval {
            tombstone_id: first.tombstone_id.clone(),
            primary_actor: "alice".into(),
            secondary_actor: "bob".into(),
            reason: "x".into(),
            apply: true,
        })
        .unwrap();

        let second = dal.record_archive(&request("a.py", b"revive")).unwrap();
        assert_eq!(first.artifact_id, second.artifact_id);
        let payload = dal.get_restore_payload(&second.tombstone_id).unwrap();
        assert_eq!(payload.artifact.blob.as_deref(), Some(&b"revive"[..]));
        assert_eq!(payload.artifact.storage_driver, StorageDriver::Db);
        assert_eq!(payload.artifact.object_url, None);
    }

    #[test]
    fn test_list_filters_and_probe() {
        let dal = dal();
        dal.record_archive(&request("a.py", b"1")).unwrap();
        let mut other = request("b.py", b"2");
        other.repo = "other".into();
        dal.record_archive(&other).unwrap();

        assert_eq!(dal.list_items(&ListFilter::default()).unwrap().len(), 2);
        let only = dal
            .list_items(&ListFilter {
                repo: Some("other".into()),
                ..ListFilter::default()
            })
            .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].path, "b.py");
        assert!(dal.list_items(&ListFilter::probe()).unwrap().is_empty());

        let future = ListFilter {
            since: Some(now() + chrono::Duration::days(1)),
            ..ListFilter::default()
        };
        assert!(dal.list_items(&future).unwrap().is_empty());
    }

    #[test]
    fn test_probe_fails_before_schema() {
        let dal = SqliteDal::open_in_memory().unwrap();
        assert!(dal.list_items(&ListFilter::probe()).is_err());
    }

    #[test]
    fn test_referents_and_summary() {
        let dal = dal();
        let receipt = dal.record_archive(&request("a.py", b"12345")).unwrap();
        dal.add_referent(&receipt.tombstone_id, "ticket", "OPS-1").unwrap();
        dal.add_referent(&receipt.tombstone_id, "ticket", "OPS-1").unwrap();
        let detail = dal.show_item(&receipt.tombstone_id).unwrap();
        assert_eq!(
            detail.referents,
            vec![Referent {
                ref_type: "ticket".into(),
                ref_value: "OPS-1".into()
            }]
        );
        let summary = dal.summary().unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.total_bytes, 5);
    }
}
