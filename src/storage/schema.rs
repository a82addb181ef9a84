//! DDL bundles for each supported backend.
//!
//! All three bundles describe the same logical schema: `artifact`, `item`,
//! `event`, `tag` and `referent`, with indexes on `item(repo, path)`,
//! `item(archived_at)` and `event(item_id, created_at)`. Every statement is
//! idempotent so the bundle can be applied on each startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Supported archive backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Postgres,
    #[serde(rename = "mariadb")]
    MariaDb,
}

impl Backend {
    pub const ALL: [Self; 3] = [Self::Sqlite, Self::Postgres, Self::MariaDb];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MariaDb => "mariadb",
        }
    }

    /// Infer the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| ArchiveError::UnsupportedBackend(format!("no scheme in URL '{url}'")))?;
        // sqlalchemy-style driver suffixes such as `postgresql+psycopg`
        let base = scheme.split('+').next().unwrap_or_default();
        base.parse()
    }

    /// Ordered DDL statements for this backend.
    #[must_use]
    pub const fn statements(&self) -> &'static [&'static str] {
        match self {
            Self::Sqlite => SQLITE,
            Self::Postgres => POSTGRES,
            Self::MariaDb => MARIADB,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mariadb" | "mysql" => Ok(Self::MariaDb),
            other => Err(ArchiveError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// DDL statements for a backend given by name.
pub fn statements_for(name: &str) -> Result<&'static [&'static str]> {
    Ok(name.parse::<Backend>()?.statements())
}

const SQLITE: &[&str] = &[
    "PRAGMA journal_mode=WAL",
    "CREATE TABLE IF NOT EXISTS artifact (
  id             TEXT PRIMARY KEY,
  content_sha256 TEXT NOT NULL UNIQUE,
  size_bytes     INTEGER NOT NULL,
  compression    TEXT NOT NULL DEFAULT 'zstd',
  mime_type      TEXT NOT NULL,
  storage_driver TEXT NOT NULL DEFAULT 'db' CHECK (storage_driver IN ('db','object')),
  blob_bytes     BLOB,
  object_url     TEXT,
  created_at     TEXT NOT NULL
)",
    "CREATE TABLE IF NOT EXISTS item (
  id             TEXT PRIMARY KEY,
  repo           TEXT NOT NULL,
  path           TEXT NOT NULL,
  commit_sha     TEXT NOT NULL,
  language       TEXT,
  kind           TEXT NOT NULL CHECK (kind IN ('code','doc','asset')),
  reason         TEXT NOT NULL CHECK (reason IN ('dead','pruned','legacy','replaced')),
  artifact_id    TEXT NOT NULL REFERENCES artifact(id),
  metadata       TEXT NOT NULL DEFAULT '{}',
  archived_by    TEXT NOT NULL,
  archived_at    TEXT NOT NULL,
  tombstone_id   TEXT NOT NULL UNIQUE,
  legal_hold     INTEGER NOT NULL DEFAULT 0,
  delete_after   TEXT,
  restored_at    TEXT,
  purge_approved_at TEXT
)",
    "CREATE INDEX IF NOT EXISTS idx_item_repo_path ON item(repo, path)",
    "CREATE INDEX IF NOT EXISTS idx_item_archived_at ON item(archived_at)",
    "CREATE INDEX IF NOT EXISTS idx_item_artifact ON item(artifact_id)",
    "CREATE TABLE IF NOT EXISTS event (
  id         TEXT PRIMARY KEY,
  item_id    TEXT NOT NULL REFERENCES item(id),
  action     TEXT NOT NULL CHECK (action IN ('ARCHIVE','RESTORE','PRUNE_REQUEST','DELETE_APPROVED')),
  actor      TEXT NOT NULL,
  context    TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL
)",
    "CREATE INDEX IF NOT EXISTS idx_event_item_time ON event(item_id, created_at)",
    "CREATE TABLE IF NOT EXISTS tag (
  item_id TEXT NOT NULL REFERENCES item(id),
  tag     TEXT NOT NULL,
  PRIMARY KEY (item_id, tag)
)",
    "CREATE TABLE IF NOT EXISTS referent (
  item_id   TEXT NOT NULL REFERENCES item(id),
  ref_type  TEXT NOT NULL,
  ref_value TEXT NOT NULL,
  PRIMARY KEY (item_id, ref_type, ref_value)
)",
];

const POSTGRES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS artifact (
  id               UUID PRIMARY KEY,
  content_sha256   CHAR(64) NOT NULL UNIQUE,
  size_bytes       BIGINT NOT NULL,
  compression      TEXT NOT NULL DEFAULT 'zstd',
  mime_type        TEXT NOT NULL,
  storage_driver   TEXT NOT NULL DEFAULT 'db' CHECK (storage_driver IN ('db','object')),
  blob_bytes       BYTEA,
  object_url       TEXT,
  created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)",
    "CREATE TABLE IF NOT EXISTS item (
  id               UUID PRIMARY KEY,
  repo             TEXT NOT NULL,
  path             TEXT NOT NULL,
  commit_sha       VARCHAR(64) NOT NULL,
  language         TEXT,
  kind             TEXT NOT NULL CHECK (kind IN ('code','doc','asset')),
  reason           TEXT NOT NULL CHECK (reason IN ('dead','pruned','legacy','replaced')),
  artifact_id      UUID NOT NULL REFERENCES artifact(id),
  metadata         JSONB NOT NULL DEFAULT '{}'::jsonb,
  archived_by      TEXT NOT NULL,
  archived_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  tombstone_id     UUID NOT NULL UNIQUE,
  legal_hold       BOOLEAN NOT NULL DEFAULT FALSE,
  delete_after     TIMESTAMPTZ,
  restored_at      TIMESTAMPTZ,
  purge_approved_at TIMESTAMPTZ
)",
    "CREATE INDEX IF NOT EXISTS idx_item_repo_path ON item(repo, path)",
    "CREATE INDEX IF NOT EXISTS idx_item_archived_at ON item(archived_at)",
    "CREATE INDEX IF NOT EXISTS idx_item_artifact ON item(artifact_id)",
    "CREATE INDEX IF NOT EXISTS idx_item_metadata_gin ON item USING GIN (metadata)",
    "CREATE TABLE IF NOT EXISTS event (
  id               UUID PRIMARY KEY,
  item_id          UUID NOT NULL REFERENCES item(id),
  action           TEXT NOT NULL CHECK (action IN ('ARCHIVE','RESTORE','PRUNE_REQUEST','DELETE_APPROVED')),
  actor            TEXT NOT NULL,
  context          JSONB NOT NULL DEFAULT '{}'::jsonb,
  created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)",
    "CREATE INDEX IF NOT EXISTS idx_event_item_time ON event(item_id, created_at)",
    "CREATE TABLE IF NOT EXISTS tag (
  item_id          UUID NOT NULL REFERENCES item(id),
  tag              TEXT NOT NULL,
  PRIMARY KEY (item_id, tag)
)",
    "CREATE TABLE IF NOT EXISTS referent (
  item_id          UUID NOT NULL REFERENCES item(id),
  ref_type         TEXT NOT NULL,
  ref_value        TEXT NOT NULL,
  PRIMARY KEY (item_id, ref_type, ref_value)
)",
];

// Timestamps are DATETIME(6) holding UTC; enumerations are VARCHAR + CHECK.
const MARIADB: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS artifact (
  id             CHAR(36) PRIMARY KEY,
  content_sha256 CHAR(64) NOT NULL UNIQUE,
  size_bytes     BIGINT NOT NULL,
  compression    VARCHAR(16) NOT NULL DEFAULT 'zstd',
  mime_type      VARCHAR(255) NOT NULL,
  storage_driver VARCHAR(16) NOT NULL DEFAULT 'db' CHECK (storage_driver IN ('db','object')),
  blob_bytes     LONGBLOB,
  object_url     TEXT,
  created_at     DATETIME(6) NOT NULL
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS item (
  id             CHAR(36) PRIMARY KEY,
  repo           VARCHAR(512) NOT NULL,
  path           VARCHAR(2048) NOT NULL,
  commit_sha     VARCHAR(64) NOT NULL,
  language       VARCHAR(64),
  kind           VARCHAR(16) NOT NULL CHECK (kind IN ('code','doc','asset')),
  reason         VARCHAR(16) NOT NULL CHECK (reason IN ('dead','pruned','legacy','replaced')),
  artifact_id    CHAR(36) NOT NULL,
  metadata       JSON NOT NULL,
  archived_by    VARCHAR(256) NOT NULL,
  archived_at    DATETIME(6) NOT NULL,
  tombstone_id   CHAR(36) NOT NULL UNIQUE,
  legal_hold     BOOLEAN NOT NULL DEFAULT FALSE,
  delete_after   DATETIME(6) NULL,
  restored_at    DATETIME(6) NULL,
  purge_approved_at DATETIME(6) NULL,
  FOREIGN KEY (artifact_id) REFERENCES artifact(id)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE INDEX IF NOT EXISTS idx_item_repo_path ON item(repo(191), path(191))",
    "CREATE INDEX IF NOT EXISTS idx_item_archived_at ON item(archived_at)",
    "CREATE TABLE IF NOT EXISTS event (
  id          CHAR(36) PRIMARY KEY,
  item_id     CHAR(36) NOT NULL,
  action      VARCHAR(32) NOT NULL CHECK (action IN ('ARCHIVE','RESTORE','PRUNE_REQUEST','DELETE_APPROVED')),
  actor       VARCHAR(256) NOT NULL,
  context     JSON NOT NULL,
  created_at  DATETIME(6) NOT NULL,
  FOREIGN KEY (item_id) REFERENCES item(id)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE INDEX IF NOT EXISTS idx_event_item_time ON event(item_id, created_at)",
    "CREATE TABLE IF NOT EXISTS tag (
  item_id  CHAR(36) NOT NULL,
  tag      VARCHAR(128) NOT NULL,
  PRIMARY KEY (item_id, tag),
  FOREIGN KEY (item_id) REFERENCES item(id)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS referent (
  item_id   CHAR(36) NOT NULL,
  ref_type  VARCHAR(32) NOT NULL,
  ref_value VARCHAR(512) NOT NULL,
  PRIMARY KEY (item_id, ref_type, ref_value),
  FOREIGN KEY (item_id) REFERENCES item(id)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_bundle_defines_the_same_tables_and_indexes() {
        for backend in Backend::ALL {
            let sql = backend.statements().join("\n");
            for table in ["artifact", "item", "event", "tag", "referent"] {
                assert!(
                    sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                    "{backend} missing table {table}"
                );
            }
            for index in ["idx_item_repo_path", "idx_item_archived_at", "idx_event_item_time"] {
                assert!(sql.contains(index), "{backend} missing index {index}");
            }
            assert!(sql.contains("purge_approved_at"), "{backend} missing purge_approved_at");
        }
    }

    #[test]
    fn test_only_sqlite_sets_wal() {
        assert_eq!(Backend::Sqlite.statements()[0], "PRAGMA journal_mode=WAL");
        assert!(!Backend::Postgres.statements().join("").contains("PRAGMA"));
    }

    #[test]
    fn test_statements_for_unknown_backend() {
        assert!(statements_for("postgresql").is_ok());
        assert!(matches!(
            statements_for("oracle"),
            Err(ArchiveError::UnsupportedBackend(name)) if name == "oracle"
        ));
    }

    #[test]
    fn test_backend_from_url() {
        assert_eq!(Backend::from_url("sqlite:///tmp/a.db").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("postgresql+psycopg://u@h/db").unwrap(),
            Backend::Postgres
        );
        assert_eq!(Backend::from_url("mysql://u@h/db").unwrap(), Backend::MariaDb);
        assert!(Backend::from_url("redis://h").is_err());
        assert!(Backend::from_url("nonsense").is_err());
    }
}
