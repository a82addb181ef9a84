//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Not found (tombstones, artifacts, purged bytes, input files)
//! - 2xx: Conflict (dual-control approver identity)
//! - 3xx: Permission denied (legal hold)
//! - 4xx: Unsupported (backend, codec)
//! - 5xx: Transient (connection, timeout; eligible for retry)
//! - 6xx: Storage
//! - 7xx: Validation and configuration

use serde::{Deserialize, Serialize};

/// Standardized error codes for robot mode output.
///
/// Each variant maps to a numeric code (e.g., `TombstoneNotFound` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Not found (1xx)
    // ========================================
    /// E101: No item carries the requested tombstone id
    TombstoneNotFound,
    /// E102: Item references an artifact row that does not exist
    ArtifactNotFound,
    /// E103: Artifact blob was scrubbed by a dual-control purge
    ArtifactPurged,
    /// E104: Input file does not exist
    FileNotFound,

    // ========================================
    // Conflict (2xx)
    // ========================================
    /// E201: Primary and secondary approver are the same identity
    ApprovalConflict,

    // ========================================
    // Permission (3xx)
    // ========================================
    /// E301: Item is under legal hold
    LegalHold,

    // ========================================
    // Unsupported (4xx)
    // ========================================
    /// E401: Backend name or URL scheme is not supported
    UnsupportedBackend,
    /// E402: Compression codec is not supported
    UnsupportedCodec,

    // ========================================
    // Transient (5xx)
    // ========================================
    /// E501: Backend could not be reached
    BackendUnavailable,
    /// E502: Operation failed with a retryable error
    TransientFailure,

    // ========================================
    // Storage (6xx)
    // ========================================
    /// E601: Database driver reported an error
    DatabaseError,
    /// E602: File read or write failed
    IoError,
    /// E603: JSON encode/decode failed
    SerializationError,
    /// E604: Stored bytes could not be decompressed
    DecompressionFailed,

    // ========================================
    // Validation (7xx)
    // ========================================
    /// E701: Malformed input
    ValidationFailed,
    /// E702: Configuration is invalid
    ConfigInvalid,
    /// E703: Git lookup failed
    GitError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `TombstoneNotFound` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::TombstoneNotFound => 101,
            Self::ArtifactNotFound => 102,
            Self::ArtifactPurged => 103,
            Self::FileNotFound => 104,

            Self::ApprovalConflict => 201,

            Self::LegalHold => 301,

            Self::UnsupportedBackend => 401,
            Self::UnsupportedCodec => 402,

            Self::BackendUnavailable => 501,
            Self::TransientFailure => 502,

            Self::DatabaseError => 601,
            Self::IoError => 602,
            Self::SerializationError => 603,
            Self::DecompressionFailed => 604,

            Self::ValidationFailed => 701,
            Self::ConfigInvalid => 702,
            Self::GitError => 703,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::TombstoneNotFound => "Run `tomb list` to see archived items and their tombstone ids",
            Self::ArtifactNotFound => "The archive references a missing artifact row. Inspect the database for manual edits",
            Self::ArtifactPurged => "The content was purged under dual control and cannot be restored",
            Self::FileNotFound => "Check the file path. Paths are resolved relative to the current directory",

            Self::ApprovalConflict => "Purge requires two distinct approvers. Pass a different identity with --second",

            Self::LegalHold => "The item is under legal hold. Release the hold before requesting a purge",

            Self::UnsupportedBackend => "Use one of sqlite, postgres or mariadb, or a URL with a matching scheme",
            Self::UnsupportedCodec => "Use zstd or zlib as the compression codec",

            Self::BackendUnavailable => "Check that the database is running and TOMB_ARCHIVE_URL is correct. Run `tomb health-check`",
            Self::TransientFailure => "The backend reported a temporary failure. Retry, or enable retries with TOMB_RETRY_ENABLED=1",

            Self::DatabaseError => "Run `tomb health-check --debug` to inspect the backend connection",
            Self::IoError => "Check that the path exists and permissions are correct",
            Self::SerializationError => "The data format may be corrupted. Check input data for validity",
            Self::DecompressionFailed => "Stored bytes do not match the recorded codec. The artifact may be corrupted",

            Self::ValidationFailed => "Review the input values and try again",
            Self::ConfigInvalid => "Run `tomb config show` to inspect the effective configuration",
            Self::GitError => "Pass an explicit commit sha with --commit, or run inside a git repository",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::TombstoneNotFound
            | Self::FileNotFound
            | Self::ApprovalConflict
            | Self::LegalHold
            | Self::UnsupportedBackend
            | Self::UnsupportedCodec
            | Self::BackendUnavailable
            | Self::TransientFailure
            | Self::IoError
            | Self::ValidationFailed
            | Self::ConfigInvalid
            | Self::GitError => true,

            Self::ArtifactNotFound
            | Self::ArtifactPurged
            | Self::DatabaseError
            | Self::SerializationError
            | Self::DecompressionFailed => false,
        }
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "not_found",
            2 => "conflict",
            3 => "permission_denied",
            4 => "unsupported",
            5 => "transient",
            6 => "storage",
            7 => "validation",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::TombstoneNotFound,
            Self::ArtifactNotFound,
            Self::ArtifactPurged,
            Self::FileNotFound,
            Self::ApprovalConflict,
            Self::LegalHold,
            Self::UnsupportedBackend,
            Self::UnsupportedCodec,
            Self::BackendUnavailable,
            Self::TransientFailure,
            Self::DatabaseError,
            Self::IoError,
            Self::SerializationError,
            Self::DecompressionFailed,
            Self::ValidationFailed,
            Self::ConfigInvalid,
            Self::GitError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::TombstoneNotFound.numeric(), 101);
        assert_eq!(ErrorCode::ApprovalConflict.numeric(), 201);
        assert_eq!(ErrorCode::LegalHold.numeric(), 301);
        assert_eq!(ErrorCode::UnsupportedBackend.numeric(), 401);
        assert_eq!(ErrorCode::BackendUnavailable.numeric(), 501);
        assert_eq!(ErrorCode::DatabaseError.numeric(), 601);
        assert_eq!(ErrorCode::ValidationFailed.numeric(), 701);
    }

    #[test]
    fn test_error_code_string() {
        assert_eq!(ErrorCode::TombstoneNotFound.code_string(), "E101");
        assert_eq!(ErrorCode::LegalHold.code_string(), "E301");
    }

    #[test]
    fn test_all_codes_have_suggestions_and_categories() {
        for code in ErrorCode::all() {
            assert!(!code.suggestion().is_empty(), "{code:?} has empty suggestion");
            assert_ne!(code.category(), "unknown", "{code:?} has invalid category");
        }
    }

    #[test]
    fn test_numeric_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(seen.insert(code.numeric()), "duplicate numeric for {code:?}");
        }
    }

    #[test]
    fn test_serialization_uses_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ApprovalConflict).unwrap();
        assert_eq!(json, "\"APPROVAL_CONFLICT\"");
    }
}
