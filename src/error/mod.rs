//! Error handling for the tombstone archive.
//!
//! This module provides:
//! - [`ArchiveError`]: The main error enum for all archive operations
//! - [`ErrorKind`]: The coarse taxonomy callers branch on (retry, exit codes)
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Rich error type with suggestions and context

mod codes;
mod suggestions;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;
pub use suggestions::suggest_for_error;

/// Main error type for archive operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown tombstone: {0}")]
    UnknownTombstone(String),

    #[error("Unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error("Artifact for tombstone {0} has been purged")]
    ArtifactPurged(String),

    #[error("Invalid approval: {0}")]
    InvalidApproval(String),

    #[error("Tombstone {0} is under legal hold")]
    LegalHoldViolation(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Unsupported compression codec: {0}")]
    UnsupportedCodec(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Decompression failed ({codec}): {reason}")]
    Decompression { codec: String, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// Coarse error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PermissionDenied,
    Unsupported,
    Transient,
    Validation,
    Storage,
}

impl ArchiveError {
    /// Get the error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) | Self::Sql(_) if self.is_transient() => ErrorCode::TransientFailure,
            Self::Database(_) | Self::Sql(_) => ErrorCode::DatabaseError,
            Self::Git(_) => ErrorCode::GitError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::SerializationError,
            Self::UnknownTombstone(_) => ErrorCode::TombstoneNotFound,
            Self::UnknownArtifact(_) => ErrorCode::ArtifactNotFound,
            Self::ArtifactPurged(_) => ErrorCode::ArtifactPurged,
            Self::InvalidApproval(_) => ErrorCode::ApprovalConflict,
            Self::LegalHoldViolation(_) => ErrorCode::LegalHold,
            Self::UnsupportedBackend(_) => ErrorCode::UnsupportedBackend,
            Self::UnsupportedCodec(_) => ErrorCode::UnsupportedCodec,
            Self::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            Self::Transient(_) => ErrorCode::TransientFailure,
            Self::FileNotFound(_) => ErrorCode::FileNotFound,
            Self::Decompression { .. } => ErrorCode::DecompressionFailed,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::Config(_) => ErrorCode::ConfigInvalid,
        }
    }

    /// Map this error onto the coarse taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            return ErrorKind::Transient;
        }
        match self {
            Self::UnknownTombstone(_) | Self::UnknownArtifact(_) | Self::ArtifactPurged(_) => {
                ErrorKind::NotFound
            }
            Self::InvalidApproval(_) => ErrorKind::Conflict,
            Self::LegalHoldViolation(_) => ErrorKind::PermissionDenied,
            Self::UnsupportedBackend(_) | Self::UnsupportedCodec(_) => ErrorKind::Unsupported,
            Self::FileNotFound(_) | Self::Validation(_) | Self::Config(_) | Self::Git(_) => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Storage,
        }
    }

    /// Whether the retry policy may re-run the failed operation.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::BackendUnavailable(_) => true,
            Self::Sql(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::UnknownTombstone(id) | Self::ArtifactPurged(id) | Self::LegalHoldViolation(id) => {
                Some(serde_json::json!({ "tombstone": id }))
            }
            Self::UnknownArtifact(id) => Some(serde_json::json!({ "artifact": id })),
            Self::FileNotFound(path) => Some(serde_json::json!({ "path": path.display().to_string() })),
            Self::UnsupportedCodec(codec) => Some(serde_json::json!({ "codec": codec })),
            Self::UnsupportedBackend(name) => Some(serde_json::json!({ "backend": name })),
            Self::Decompression { codec, reason } => {
                Some(serde_json::json!({ "codec": codec, "reason": reason }))
            }
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_archive_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
///
/// Emitted on stdout in robot mode so automation can branch on `kind`
/// rather than parsing messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub kind: ErrorKind,
    pub message: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub recoverable: bool,
    pub category: String,
}

impl StructuredError {
    /// Create a structured error from an [`ArchiveError`].
    #[must_use]
    pub fn from_archive_error(err: &ArchiveError) -> Self {
        let code = err.code();
        let context = err.context();
        let suggestion = suggest_for_error(code, context.as_ref());
        Self {
            code,
            numeric_code: code.numeric(),
            kind: err.kind(),
            message: err.to_string(),
            suggestion,
            context,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
        }
    }

    /// Set a custom suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&ArchiveError> for StructuredError {
    fn from(err: &ArchiveError) -> Self {
        Self::from_archive_error(err)
    }
}

/// Result type alias using ArchiveError.
pub type Result<T> = std::result::Result<T, ArchiveError>;
