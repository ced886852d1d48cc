use std::path::PathBuf;
use thiserror::Error;

/// Error type for index construction, persistence and querying
#[derive(Error, Debug)]
pub enum ScwError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "Premature end of shard file {path}: expected {expected} bytes, found {actual} \
         (possibly an out of date index)"
    )]
    Truncated {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Shard format mismatch in {path}: {detail}")]
    FormatMismatch { path: PathBuf, detail: String },

    #[error("Shard checksum mismatch in {0}")]
    ChecksumMismatch(PathBuf),

    #[error("Out of memory reserving {words} words for {what}")]
    OutOfMemory { what: &'static str, words: usize },

    #[error("Section {index} out of range: session has {count} sections")]
    SectionOutOfRange { index: usize, count: usize },

    #[error("Shard {index} out of range: {count} shards loaded")]
    ShardOutOfRange { index: usize, count: usize },

    #[error("No record is open; begin a record before adding pieces")]
    NoOpenRecord,

    #[error("No query session is active")]
    NoActiveSession,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, ScwError>;

impl ScwError {
    /// Whether the error means the on-disk index does not match what the
    /// caller expects, so rebuilding it is the remedy.
    pub fn is_stale_index(&self) -> bool {
        matches!(
            self,
            ScwError::Truncated { .. }
                | ScwError::FormatMismatch { .. }
                | ScwError::ChecksumMismatch(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScwError::SectionOutOfRange { index: 3, count: 2 };
        assert_eq!(
            err.to_string(),
            "Section 3 out of range: session has 2 sections"
        );
    }

    #[test]
    fn test_stale_index_errors() {
        let truncated = ScwError::Truncated {
            path: PathBuf::from("a.slices0"),
            expected: 10,
            actual: 4,
        };
        assert!(truncated.is_stale_index());
        assert!(ScwError::ChecksumMismatch(PathBuf::from("x")).is_stale_index());
        assert!(!ScwError::NoActiveSession.is_stale_index());
        let io = ScwError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!io.is_stale_index());
    }
}
