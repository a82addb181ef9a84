//! Storage layer for the tombstone archive.
//!
//! One [`ArchiveStore`] interface with a SQLite, PostgreSQL and MariaDB
//! implementation, plus the pure content-addressing helpers and the evidence
//! trail the service appends to.

pub mod content;
pub mod dal;
pub mod evidence;
pub mod mariadb;
pub mod model;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use content::{Codec, digest};
pub use dal::{ArchiveStore, Dal};
pub use evidence::{EvidenceLog, EvidenceRecord};
pub use mariadb::MariaDbDal;
pub use postgres::PostgresDal;
pub use schema::{Backend, statements_for};
pub use sqlite::SqliteDal;
