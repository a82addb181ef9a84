//! Domain records shared by every archive backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ArchiveError, Result};

/// `object_url` written onto an artifact whose blob was scrubbed by a purge.
pub const PURGE_SENTINEL_URL: &str = "purged://dual-control";

/// Default page size for `list`.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ArchiveError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ArchiveError::Validation(format!(
                        "invalid {} '{}': expected one of {}",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// What sort of file an item was.
    ItemKind { Code => "code", Doc => "doc", Asset => "asset" }
}

string_enum! {
    /// Why an item was removed from the codebase.
    ArchiveReason { Dead => "dead", Pruned => "pruned", Legacy => "legacy", Replaced => "replaced" }
}

string_enum! {
    /// Audit event kinds.
    EventAction {
        Archive => "ARCHIVE",
        Restore => "RESTORE",
        PruneRequest => "PRUNE_REQUEST",
        DeleteApproved => "DELETE_APPROVED",
    }
}

string_enum! {
    /// Where an artifact's bytes live.
    StorageDriver { Db => "db", Object => "object" }
}

/// Incoming artifact bytes and their descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub content_sha256: String,
    pub size_bytes: i64,
    pub compression: String,
    pub mime_type: String,
    pub storage_driver: StorageDriver,
    pub blob: Option<Vec<u8>>,
    pub object_url: Option<String>,
}

impl ArtifactPayload {
    /// Whether a stored row needs to be refreshed from this payload.
    ///
    /// True when the stored blob was scrubbed, or any descriptive column differs.
    #[must_use]
    pub fn differs_from(&self, stored: &ArtifactRecord) -> bool {
        (stored.blob.is_none() && self.blob.is_some())
            || stored.storage_driver != self.storage_driver
            || stored.size_bytes != self.size_bytes
            || stored.compression != self.compression
            || stored.mime_type != self.mime_type
            || stored.object_url != self.object_url
    }
}

/// A stored artifact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub content_sha256: String,
    pub size_bytes: i64,
    pub compression: String,
    pub mime_type: String,
    pub storage_driver: StorageDriver,
    #[serde(skip)]
    pub blob: Option<Vec<u8>>,
    pub object_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    #[must_use]
    pub const fn is_purged(&self) -> bool {
        self.blob.is_none()
    }
}

/// A stored item row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub tombstone_id: String,
    pub repo: String,
    pub path: String,
    pub commit_sha: String,
    pub language: Option<String>,
    pub kind: ItemKind,
    pub reason: ArchiveReason,
    pub artifact_id: String,
    pub metadata: Map<String, Value>,
    pub archived_by: String,
    pub archived_at: DateTime<Utc>,
    pub legal_hold: bool,
    pub delete_after: Option<DateTime<Utc>>,
    pub restored_at: Option<DateTime<Utc>>,
}

/// One audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub action: EventAction,
    pub actor: String,
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Row returned by `list_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub tombstone_id: String,
    pub repo: String,
    pub path: String,
    pub commit_sha: String,
    pub reason: ArchiveReason,
    pub archived_by: String,
    pub archived_at: DateTime<Utc>,
}

/// External reference to an archived item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referent {
    pub ref_type: String,
    pub ref_value: String,
}

/// An item with its audit history, tags and referents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub item: ItemRecord,
    pub events: Vec<EventRecord>,
    pub tags: Vec<String>,
    pub referents: Vec<Referent>,
}

/// Item plus its artifact, as needed for a restore.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePayload {
    pub item: ItemRecord,
    pub artifact: ArtifactRecord,
}

/// Everything `record_archive` writes in one transaction.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub repo: String,
    pub path: String,
    pub commit_sha: String,
    pub language: Option<String>,
    pub reason: ArchiveReason,
    pub kind: ItemKind,
    pub artifact: ArtifactPayload,
    pub archived_by: String,
    pub metadata: Map<String, Value>,
    pub context: Map<String, Value>,
    pub tags: Vec<String>,
}

/// Identifiers minted by `record_archive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReceipt {
    pub tombstone_id: String,
    pub artifact_id: String,
    pub item_id: String,
}

/// Filters for `list_items`. A limit of zero is a valid probe that returns nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub repo: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            repo: None,
            since: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ListFilter {
    #[must_use]
    pub fn probe() -> Self {
        Self {
            limit: 0,
            ..Self::default()
        }
    }
}

/// Archive-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    /// Number of items.
    pub count: i64,
    /// Sum of original sizes over all items.
    pub total_bytes: i64,
}

/// A dual-control purge approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteApproval {
    pub tombstone_id: String,
    pub primary_actor: String,
    pub secondary_actor: String,
    pub reason: String,
    pub apply: bool,
}

impl DeleteApproval {
    /// Checks that must pass before any backend is touched.
    pub fn validate(&self) -> Result<()> {
        if self.primary_actor.trim().is_empty() || self.secondary_actor.trim().is_empty() {
            return Err(ArchiveError::InvalidApproval(
                "both approvers must be named".to_string(),
            ));
        }
        if self.primary_actor == self.secondary_actor {
            return Err(ArchiveError::InvalidApproval(format!(
                "primary and secondary approver must differ (both '{}')",
                self.primary_actor
            )));
        }
        Ok(())
    }

    /// Event contexts for the primary and secondary approver.
    #[must_use]
    pub fn event_contexts(&self, outcome: Option<PurgeOutcome>) -> [(String, Map<String, Value>); 2] {
        let build = |role: &str| {
            let mut ctx = Map::new();
            ctx.insert("role".into(), Value::from(role));
            ctx.insert("reason".into(), Value::from(self.reason.as_str()));
            if let Some(outcome) = outcome {
                ctx.insert("apply_requested".into(), Value::Bool(true));
                ctx.insert("blob_scrubbed".into(), Value::Bool(outcome.scrubbed()));
                if outcome.unpurged_siblings > 0 {
                    ctx.insert("shared_references".into(), Value::from(outcome.unpurged_siblings));
                }
            }
            ctx
        };
        [
            (self.primary_actor.clone(), build("primary")),
            (self.secondary_actor.clone(), build("secondary")),
        ]
    }
}

/// What an applied purge found on the shared artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Other items on the same artifact without an applied purge of their own.
    pub unpurged_siblings: i64,
}

impl PurgeOutcome {
    /// The blob goes once every referencing item has an applied purge.
    #[must_use]
    pub const fn scrubbed(&self) -> bool {
        self.unpurged_siblings == 0
    }
}

/// Retention fields lifted out of archive metadata into item columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    pub legal_hold: bool,
    pub delete_after: Option<DateTime<Utc>>,
}

impl Retention {
    /// Remove `legal_hold` and `delete_after` from `metadata` and parse them.
    pub fn take_from(metadata: &mut Map<String, Value>) -> Result<Self> {
        let legal_hold = match metadata.remove("legal_hold") {
            None | Some(Value::Null) => false,
            Some(value) => truthy(&value),
        };
        let delete_after = match metadata.remove("delete_after") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(parse_timestamp(&s)?),
            Some(other) => {
                return Err(ArchiveError::Validation(format!(
                    "delete_after must be a timestamp string, got {other}"
                )));
            }
        };
        Ok(Self {
            legal_hold,
            delete_after,
        })
    }

    /// Echo the columns back into a metadata map for display.
    pub fn echo_into(&self, metadata: &mut Map<String, Value>) {
        metadata.insert("legal_hold".into(), Value::Bool(self.legal_hold));
        if let Some(ts) = self.delete_after {
            metadata.insert("delete_after".into(), Value::from(format_timestamp(ts)));
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Current time at microsecond precision, the finest every backend stores.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// RFC 3339 with microseconds and a `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]` and `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(ArchiveError::Validation(format!("invalid timestamp '{raw}'")))
}

/// Fresh tombstone handle.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Event ids are time-ordered so `(created_at, id)` sorts in insertion order.
#[must_use]
pub fn new_event_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Parse a JSON object stored as text; anything else decodes to an empty map.
pub fn parse_json_map(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(text) if text.trim().is_empty() => Ok(Map::new()),
        Some(text) => match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        },
    }
}
