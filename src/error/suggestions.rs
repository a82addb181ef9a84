//! Context-aware error suggestions.
//!
//! Complements the static suggestions in the `codes` module with hints that
//! mention the tombstone, path or backend involved.

use serde_json::Value;

use super::codes::ErrorCode;

/// Generate a context-aware suggestion for an error.
pub fn suggest_for_error(code: ErrorCode, context: Option<&Value>) -> String {
    let field = |key: &str| context.and_then(|c| c.get(key)).and_then(Value::as_str);

    match code {
        ErrorCode::TombstoneNotFound => match field("tombstone") {
            Some(id) => format!(
                "No archived item has tombstone '{id}'. Run `tomb list` to see recent tombstones, \
                 or check that TOMB_ARCHIVE_URL points at the right archive"
            ),
            None => code.suggestion().to_string(),
        },
        ErrorCode::ArtifactPurged => match field("tombstone") {
            Some(id) => format!(
                "Tombstone '{id}' was purged under dual control. Run `tomb show {id}` to see the approvals"
            ),
            None => code.suggestion().to_string(),
        },
        ErrorCode::FileNotFound => match field("path") {
            Some(path) => format!("'{path}' does not exist. Check the path and try again"),
            None => code.suggestion().to_string(),
        },
        ErrorCode::LegalHold => match field("tombstone") {
            Some(id) => format!(
                "Tombstone '{id}' is under legal hold. Purge is refused regardless of approvals"
            ),
            None => code.suggestion().to_string(),
        },
        ErrorCode::UnsupportedCodec => match field("codec") {
            Some(name) => format!("Codec '{name}' is not supported. Use zstd or zlib"),
            None => code.suggestion().to_string(),
        },
        _ => code.suggestion().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_suggestion_mentions_id() {
        let ctx = serde_json::json!({ "tombstone": "abc" });
        let s = suggest_for_error(ErrorCode::TombstoneNotFound, Some(&ctx));
        assert!(s.contains("'abc'"));
        assert!(s.contains("tomb list"));
    }

    #[test]
    fn test_falls_back_to_static_suggestion() {
        assert_eq!(
            suggest_for_error(ErrorCode::TombstoneNotFound, None),
            ErrorCode::TombstoneNotFound.suggestion()
        );
        assert_eq!(
            suggest_for_error(ErrorCode::DatabaseError, None),
            ErrorCode::DatabaseError.suggestion()
        );
    }
}
