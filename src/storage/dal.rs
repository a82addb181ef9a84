//! Data access layer: one interface, one implementation per backend.

use tracing::info;

use crate::error::Result;
use crate::storage::mariadb::MariaDbDal;
use crate::storage::model::{
    ArchiveReceipt, ArchiveRequest, ArchiveSummary, DeleteApproval, ItemDetail, ItemSummary,
    ListFilter, RestorePayload,
};
use crate::storage::postgres::PostgresDal;
use crate::storage::schema::Backend;
use crate::storage::sqlite::SqliteDal;
use crate::utils::redact::redact_url_credentials;

/// Persistence operations every backend implements with identical semantics.
///
/// Each call is one transaction: either everything it writes becomes visible
/// or nothing does.
pub trait ArchiveStore: Send + Sync {
    fn backend(&self) -> Backend;

    /// Apply the schema bundle. Idempotent.
    fn ensure_schema(&self) -> Result<()>;

    /// Dedup-or-insert the artifact, then insert item, `ARCHIVE` event and tags.
    fn record_archive(&self, request: &ArchiveRequest) -> Result<ArchiveReceipt>;

    /// Item and artifact for `tombstone_id`; the blob is `None` once scrubbed.
    fn get_restore_payload(&self, tombstone_id: &str) -> Result<RestorePayload>;

    /// Stamp `restored_at` and append a `RESTORE` event.
    fn record_restore(&self, tombstone_id: &str, actor: &str) -> Result<()>;

    fn record_prune_request(&self, tombstone_id: &str, actor: &str, reason: &str) -> Result<()>;

    /// Record both approvals. When applying, mark the item purged and scrub the
    /// blob once no other item on the artifact is unpurged. Returns whether the
    /// blob was scrubbed.
    fn record_delete_approval(&self, approval: &DeleteApproval) -> Result<bool>;

    fn list_items(&self, filter: &ListFilter) -> Result<Vec<ItemSummary>>;

    fn show_item(&self, tombstone_id: &str) -> Result<ItemDetail>;

    /// Insert-if-absent an external reference.
    fn add_referent(&self, tombstone_id: &str, ref_type: &str, ref_value: &str) -> Result<()>;

    fn summary(&self) -> Result<ArchiveSummary>;
}

/// The configured backend, selected once at construction.
#[derive(Debug)]
pub enum Dal {
    Sqlite(SqliteDal),
    Postgres(PostgresDal),
    MariaDb(MariaDbDal),
}

impl Dal {
    /// Open a connection (or lazy pool) for `backend` at `url`.
    pub fn connect(backend: Backend, url: &str) -> Result<Self> {
        info!(%backend, url = %redact_url_credentials(url), "connecting archive backend");
        Ok(match backend {
            Backend::Sqlite => Self::Sqlite(SqliteDal::open(url)?),
            Backend::Postgres => Self::Postgres(PostgresDal::connect(url)?),
            Backend::MariaDb => Self::MariaDb(MariaDbDal::connect(url)?),
        })
    }

    fn store(&self) -> &dyn ArchiveStore {
        match self {
            Self::Sqlite(dal) => dal,
            Self::Postgres(dal) => dal,
            Self::MariaDb(dal) => dal,
        }
    }
}

impl ArchiveStore for Dal {
    fn backend(&self) -> Backend {
        self.store().backend()
    }

    fn ensure_schema(&self) -> Result<()> {
        self.store().ensure_schema()
    }

    fn record_archive(&self, request: &ArchiveRequest) -> Result<ArchiveReceipt> {
        self.store().record_archive(request)
    }

    fn get_restore_payload(&self, tombstone_id: &str) -> Result<RestorePayload> {
        self.store().get_restore_payload(tombstone_id)
    }

    fn record_restore(&self, tombstone_id: &str, actor: &str) -> Result<()> {
        self.store().record_restore(tombstone_id, actor)
    }

    fn record_prune_request(&self, tombstone_id: &str, actor: &str, reason: &str) -> Result<()> {
        self.store().record_prune_request(tombstone_id, actor, reason)
    }

    fn record_delete_approval(&self, approval: &DeleteApproval) -> Result<bool> {
        self.store().record_delete_approval(approval)
    }

    fn list_items(&self, filter: &ListFilter) -> Result<Vec<ItemSummary>> {
        self.store().list_items(filter)
    }

    fn show_item(&self, tombstone_id: &str) -> Result<ItemDetail> {
        self.store().show_item(tombstone_id)
    }

    fn add_referent(&self, tombstone_id: &str, ref_type: &str, ref_value: &str) -> Result<()> {
        self.store().add_referent(tombstone_id, ref_type, ref_value)
    }

    fn summary(&self) -> Result<ArchiveSummary> {
        self.store().summary()
    }
}
