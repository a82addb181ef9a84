//! PostgreSQL archive backend.
//!
//! A lazily-connected sqlx pool driven by a private current-thread runtime, so
//! the [`ArchiveStore`] surface stays blocking like the SQLite backend.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::storage::dal::ArchiveStore;
use crate::storage::model::{
    ArchiveReceipt, ArchiveRequest, ArchiveSummary, ArtifactPayload, ArtifactRecord,
    DeleteApproval, EventAction, EventRecord, ItemDetail, ItemRecord, ItemSummary, ListFilter,
    PURGE_SENTINEL_URL, PurgeOutcome, Referent, RestorePayload, Retention, StorageDriver,
    new_event_id, new_id, now, parse_json_map,
};
use crate::storage::schema::Backend;

const ITEM_SELECT: &str = "SELECT id::text AS id, tombstone_id::text AS tombstone_id, repo, path, \
     commit_sha, language, kind, reason, artifact_id::text AS artifact_id, \
     metadata::text AS metadata, archived_by, archived_at, legal_hold, delete_after, restored_at \
     FROM item";

const ARTIFACT_SELECT: &str = "SELECT id::text AS id, content_sha256, size_bytes, compression, \
     mime_type, storage_driver, blob_bytes, object_url, created_at FROM artifact";

/// PostgreSQL implementation of [`ArchiveStore`].
pub struct PostgresDal {
    pool: PgPool,
    runtime: Runtime,
}

impl std::fmt::Debug for PostgresDal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDal").finish_non_exhaustive()
    }
}

impl PostgresDal {
    /// Build a lazy pool for `url`. No connection is made until the first call.
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = build_runtime()?;
        let pool = {
            let _guard = runtime.enter();
            PgPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect_lazy(url)?
        };
        Ok(Self { pool, runtime })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    async fn archive(&self, request: &ArchiveRequest) -> Result<ArchiveReceipt> {
        let mut metadata = request.metadata.clone();
        let retention = Retention::take_from(&mut metadata)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let context_json = serde_json::to_string(&request.context)?;

        let mut tx = self.pool.begin().await?;
        let artifact_id = upsert_artifact(&mut tx, &request.artifact).await?;
        let item_id = new_id();
        let tombstone_id = new_id();
        let archived_at = now();

        sqlx::query(
            "INSERT INTO item (id, tombstone_id, repo, path, commit_sha, language, kind, reason, \
             artifact_id, metadata, archived_by, archived_at, legal_hold, delete_after) \
             VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7, $8, $9::uuid, $10::jsonb, $11, $12, $13, $14)",
        )
        .bind(&item_id)
        .bind(&tombstone_id)
        .bind(&request.repo)
        .bind(&request.path)
        .bind(&request.commit_sha)
        .bind(&request.language)
        .bind(request.kind.as_str())
        .bind(request.reason.as_str())
        .bind(&artifact_id)
        .bind(&metadata_json)
        .bind(&request.archived_by)
        .bind(archived_at)
        .bind(retention.legal_hold)
        .bind(retention.delete_after)
        .execute(&mut *tx)
        .await?;

        insert_event(
            &mut tx,
            &item_id,
            EventAction::Archive,
            &request.archived_by,
            &context_json,
            archived_at,
        )
        .await?;

        for tag in request.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            sqlx::query(
                "INSERT INTO tag (item_id, tag) VALUES ($1::uuid, $2) ON CONFLICT DO NOTHING",
            )
            .bind(&item_id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ArchiveReceipt {
            tombstone_id,
            artifact_id,
            item_id,
        })
    }

    async fn restore_payload(&self, tombstone_id: &str) -> Result<RestorePayload> {
        let item = self
            .find_item(tombstone_id)
            .await?
            .ok_or_else(|| ArchiveError::UnknownTombstone(tombstone_id.to_string()))?;
        let row = sqlx::query(&format!("{ARTIFACT_SELECT} WHERE id = $1::uuid"))
            .bind(&item.artifact_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ArchiveError::UnknownArtifact(item.artifact_id.clone()))?;
        Ok(RestorePayload {
            artifact: artifact_from_row(&row)?,
            item,
        })
    }

    async fn restore(&self, tombstone_id: &str, actor: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let item_id = item_id_for(&mut tx, tombstone_id).await?;
        let ts = now();
        sqlx::query("UPDATE item SET restored_at = $1 WHERE id = $2::uuid")
            .bind(ts)
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
        insert_event(&mut tx, &item_id, EventAction::Restore, actor, "{}", ts).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn prune_request(&self, tombstone_id: &str, actor: &str, reason: &str) -> Result<()> {
        let mut context = Map::new();
        context.insert("reason".into(), Value::from(reason));
        let context_json = serde_json::to_string(&context)?;

        let mut tx = self.pool.begin().await?;
        let item_id = item_id_for(&mut tx, tombstone_id).await?;
        insert_event(
            &mut tx,
            &item_id,
            EventAction::PruneRequest,
            actor,
            &context_json,
            now(),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_approval(&self, approval: &DeleteApproval) -> Result<bool> {
        if !is_uuid(&approval.tombstone_id) {
            return Err(ArchiveError::UnknownTombstone(approval.tombstone_id.clone()));
        }
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT id::text AS id, artifact_id::text AS artifact_id, legal_hold \
             FROM item WHERE tombstone_id = $1::uuid FOR UPDATE",
        )
        .bind(&approval.tombstone_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ArchiveError::UnknownTombstone(approval.tombstone_id.clone()))?;
        let item_id: String = row.try_get("id")?;
        let artifact_id: String = row.try_get("artifact_id")?;
        if row.try_get::<bool, _>("legal_hold")? {
            return Err(ArchiveError::LegalHoldViolation(approval.tombstone_id.clone()));
        }

        let ts = now();
        let outcome = if approval.apply {
            // lock the artifact so concurrent purges of sibling items see each other
            sqlx::query("SELECT id FROM artifact WHERE id = $1::uuid FOR UPDATE")
                .bind(&artifact_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE item SET purge_approved_at = COALESCE(purge_approved_at, $1) WHERE id = $2::uuid",
            )
            .bind(ts)
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
            let unpurged_siblings: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM item \
                 WHERE artifact_id = $1::uuid AND id <> $2::uuid AND purge_approved_at IS NULL",
            )
            .bind(&artifact_id)
            .bind(&item_id)
            .fetch_one(&mut *tx)
            .await?;
            Some(PurgeOutcome { unpurged_siblings })
        } else {
            None
        };

        for (actor, context) in approval.event_contexts(outcome) {
            let context_json = serde_json::to_string(&context)?;
            insert_event(
                &mut tx,
                &item_id,
                EventAction::DeleteApproved,
                &actor,
                &context_json,
                ts,
            )
            .await?;
        }

        let scrubbed = outcome.is_some_and(|o| o.scrubbed());
        if scrubbed {
            sqlx::query(
                "UPDATE artifact SET blob_bytes = NULL, storage_driver = $1, \
                 object_url = COALESCE(object_url, $2) WHERE id = $3::uuid",
            )
            .bind(StorageDriver::Object.as_str())
            .bind(PURGE_SENTINEL_URL)
            .bind(&artifact_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(scrubbed)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ItemSummary>> {
        let mut sql = String::from(
            "SELECT id::text AS id, tombstone_id::text AS tombstone_id, repo, path, commit_sha, \
             reason, archived_by, archived_at FROM item \
             WHERE ($1::text IS NULL OR repo = $1) \
             AND ($2::timestamptz IS NULL OR archived_at >= $2) \
             ORDER BY archived_at DESC, id DESC",
        );
        sql.push_str(&format!(" LIMIT {}", filter.limit));
        let rows = sqlx::query(&sql)
            .bind(filter.repo.as_deref())
            .bind(filter.since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<ItemSummary> {
                Ok(ItemSummary {
                    id: row.try_get("id")?,
                    tombstone_id: row.try_get("tombstone_id")?,
                    repo: row.try_get("repo")?,
                    path: row.try_get("path")?,
                    commit_sha: row.try_get("commit_sha")?,
                    reason: row.try_get::<String, _>("reason")?.parse()?,
                    archived_by: row.try_get("archived_by")?,
                    archived_at: row.try_get("archived_at")?,
                })
            })
            .collect()
    }

    async fn show(&self, tombstone_id: &str) -> Result<ItemDetail> {
        let item = self
            .find_item(tombstone_id)
            .await?
            .ok_or_else(|| ArchiveError::UnknownTombstone(tombstone_id.to_string()))?;

        let rows = sqlx::query(
            "SELECT action, actor, context::text AS context, created_at FROM event \
             WHERE item_id = $1::uuid ORDER BY created_at, id",
        )
        .bind(&item.id)
        .fetch_all(&self.pool)
        .await?;
        let events = rows
            .iter()
            .map(|row| -> Result<EventRecord> {
                Ok(EventRecord {
                    action: row.try_get::<String, _>("action")?.parse()?,
                    actor: row.try_get("actor")?,
                    context: parse_json_map(row.try_get::<Option<String>, _>("context")?.as_deref())?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM tag WHERE item_id = $1::uuid ORDER BY tag")
                .bind(&item.id)
                .fetch_all(&self.pool)
                .await?;

        let referents = sqlx::query(
            "SELECT ref_type, ref_value FROM referent WHERE item_id = $1::uuid \
             ORDER BY ref_type, ref_value",
        )
        .bind(&item.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| -> Result<Referent> {
            Ok(Referent {
                ref_type: row.try_get("ref_type")?,
                ref_value: row.try_get("ref_value")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(ItemDetail {
            item,
            events,
            tags,
            referents,
        })
    }

    async fn referent(&self, tombstone_id: &str, ref_type: &str, ref_value: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let item_id = item_id_for(&mut tx, tombstone_id).await?;
        sqlx::query(
            "INSERT INTO referent (item_id, ref_type, ref_value) VALUES ($1::uuid, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&item_id)
        .bind(ref_type)
        .bind(ref_value)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn totals(&self) -> Result<ArchiveSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, COALESCE(SUM(a.size_bytes), 0)::BIGINT AS total_bytes \
             FROM item i JOIN artifact a ON a.id = i.artifact_id",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ArchiveSummary {
            count: row.try_get("count")?,
            total_bytes: row.try_get("total_bytes")?,
        })
    }

    async fn find_item(&self, tombstone_id: &str) -> Result<Option<ItemRecord>> {
        if !is_uuid(tombstone_id) {
            return Ok(None);
        }
        let row = sqlx::query(&format!("{ITEM_SELECT} WHERE tombstone_id = $1::uuid"))
            .bind(tombstone_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }
}

impl ArchiveStore for PostgresDal {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn ensure_schema(&self) -> Result<()> {
        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            for ddl in Backend::Postgres.statements() {
                sqlx::query(ddl).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            debug!("postgres schema ensured");
            Ok::<(), ArchiveError>(())
        })
    }

    fn record_archive(&self, request: &ArchiveRequest) -> Result<ArchiveReceipt> {
        self.block_on(self.archive(request))
    }

    fn get_restore_payload(&self, tombstone_id: &str) -> Result<RestorePayload> {
        self.block_on(self.restore_payload(tombstone_id))
    }

    fn record_restore(&self, tombstone_id: &str, actor: &str) -> Result<()> {
        self.block_on(self.restore(tombstone_id, actor))
    }

    fn record_prune_request(&self, tombstone_id: &str, actor: &str, reason: &str) -> Result<()> {
        self.block_on(self.prune_request(tombstone_id, actor, reason))
    }

    fn record_delete_approval(&self, approval: &DeleteApproval) -> Result<bool> {
        approval.validate()?;
        self.block_on(self.delete_approval(approval))
    }

    fn list_items(&self, filter: &ListFilter) -> Result<Vec<ItemSummary>> {
        self.block_on(self.list(filter))
    }

    fn show_item(&self, tombstone_id: &str) -> Result<ItemDetail> {
        self.block_on(self.show(tombstone_id))
    }

    fn add_referent(&self, tombstone_id: &str, ref_type: &str, ref_value: &str) -> Result<()> {
        self.block_on(self.referent(tombstone_id, ref_type, ref_value))
    }

    fn summary(&self) -> Result<ArchiveSummary> {
        self.block_on(self.totals())
    }
}

pub(crate) fn build_runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn is_uuid(raw: &str) -> bool {
    uuid::Uuid::parse_str(raw).is_ok()
}

async fn upsert_artifact(
    tx: &mut Transaction<'_, Postgres>,
    payload: &ArtifactPayload,
) -> Result<String> {
    let existing = match find_artifact_by_sha(tx, &payload.content_sha256).await? {
        Some(found) => found,
        None => {
            let id = new_id();
            sqlx::query(
                "INSERT INTO artifact (id, content_sha256, size_bytes, compression, mime_type, \
                 storage_driver, blob_bytes, object_url, created_at) \
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (content_sha256) DO NOTHING",
            )
            .bind(&id)
            .bind(&payload.content_sha256)
            .bind(payload.size_bytes)
            .bind(&payload.compression)
            .bind(&payload.mime_type)
            .bind(payload.storage_driver.as_str())
            .bind(payload.blob.as_deref())
            .bind(payload.object_url.as_deref())
            .bind(now())
            .execute(&mut **tx)
            .await?;
            let stored = find_artifact_by_sha(tx, &payload.content_sha256)
                .await?
                .ok_or_else(|| ArchiveError::UnknownArtifact(payload.content_sha256.clone()))?;
            if stored.id == id {
                return Ok(id);
            }
            stored
        }
    };

    if payload.differs_from(&existing) {
        debug!(artifact = %existing.id, "refreshing artifact row from incoming payload");
        sqlx::query(
            "UPDATE artifact SET size_bytes = $1, compression = $2, mime_type = $3, \
             storage_driver = $4, blob_bytes = $5, object_url = $6 WHERE id = $7::uuid",
        )
        .bind(payload.size_bytes)
        .bind(&payload.compression)
        .bind(&payload.mime_type)
        .bind(payload.storage_driver.as_str())
        .bind(payload.blob.as_deref())
        .bind(payload.object_url.as_deref())
        .bind(&existing.id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(existing.id)
}

async fn find_artifact_by_sha(
    tx: &mut Transaction<'_, Postgres>,
    sha: &str,
) -> Result<Option<ArtifactRecord>> {
    let row = sqlx::query(&format!(
        "{ARTIFACT_SELECT} WHERE content_sha256 = $1 FOR UPDATE"
    ))
    .bind(sha)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(artifact_from_row).transpose()
}

async fn item_id_for(tx: &mut Transaction<'_, Postgres>, tombstone_id: &str) -> Result<String> {
    if !is_uuid(tombstone_id) {
        return Err(ArchiveError::UnknownTombstone(tombstone_id.to_string()));
    }
    sqlx::query_scalar("SELECT id::text FROM item WHERE tombstone_id = $1::uuid")
        .bind(tombstone_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ArchiveError::UnknownTombstone(tombstone_id.to_string()))
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    item_id: &str,
    action: EventAction,
    actor: &str,
    context_json: &str,
    created_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO event (id, item_id, action, actor, context, created_at) \
         VALUES ($1::uuid, $2::uuid, $3, $4, $5::jsonb, $6)",
    )
    .bind(new_event_id())
    .bind(item_id)
    .bind(action.as_str())
    .bind(actor)
    .bind(context_json)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn artifact_from_row(row: &PgRow) -> Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.try_get("id")?,
        content_sha256: row.try_get("content_sha256")?,
        size_bytes: row.try_get("size_bytes")?,
        compression: row.try_get("compression")?,
        mime_type: row.try_get("mime_type")?,
        storage_driver: row.try_get::<String, _>("storage_driver")?.parse()?,
        blob: row.try_get("blob_bytes")?,
        object_url: row.try_get("object_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<ItemRecord> {
    let retention = Retention {
        legal_hold: row.try_get("legal_hold")?,
        delete_after: row.try_get("delete_after")?,
    };
    let mut metadata = parse_json_map(row.try_get::<Option<String>, _>("metadata")?.as_deref())?;
    retention.echo_into(&mut metadata);

    Ok(ItemRecord {
        id: row.try_get("id")?,
        tombstone_id: row.try_get("tombstone_id")?,
        repo: row.try_get("repo")?,
        path: row.try_get("path")?,
        commit_sha: row.try_get("commit_sha")?,
        language: row.try_get("language")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        reason: row.try_get::<String, _>("reason")?.parse()?,
        artifact_id: row.try_get("artifact_id")?,
        metadata,
        archived_by: row.try_get("archived_by")?,
        archived_at: row.try_get("archived_at")?,
        legal_hold: retention.legal_hold,
        delete_after: retention.delete_after,
        restored_at: row.try_get("restored_at")?,
    })
}
