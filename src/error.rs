//! Engine error taxonomy.
//!
//! All core APIs return [`Result`] with a fixed set of error kinds instead of
//! stringly-typed failures. The tool surface maps each variant to a stable
//! `error_code` plus a remediation `suggestion`; the binary maps fatal kinds
//! to process exit codes.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or unusable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Metadata-store or vector-store failure. Operation-local; callers
    /// retry or propagate.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The embedding service is unreachable, misbehaving, or returned
    /// vectors that violate its contract. Retryable up to the retry budget.
    #[error("embedding service error: {0}")]
    Embedding(String),

    /// A single file could not be read or extracted. Isolated: the pipeline
    /// reports it and moves on to the next file.
    #[error("failed to process {path}: {reason}")]
    FileProcessing { path: String, reason: String },

    /// Request-local search failure.
    #[error("search error: {0}")]
    Search(String),

    /// A bounded call exceeded its deadline. Never silently swallowed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Bad argument at the tool boundary.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Cross-store inconsistency surfaced by the sync manager or the vector
    /// store's own invariant checks.
    #[error("integrity error ({kind}): {detail}")]
    Integrity { kind: IntegrityKind, detail: String },
}

/// Integrity violations that surface as errors (as opposed to repairable
/// drift issues, which live in a sync report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    /// Stored or submitted vector dimensions disagree with the active
    /// embedding generation. Fatal; only `force_sync` clears it.
    DimensionMismatch,
    /// Drift that repeated auto-fix passes could not repair.
    Unresolvable,
}

impl std::fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityKind::DimensionMismatch => write!(f, "dimension_mismatch"),
            IntegrityKind::Unresolvable => write!(f, "unresolvable"),
        }
    }
}

impl EngineError {
    pub fn dimension_mismatch(detail: impl Into<String>) -> Self {
        EngineError::Integrity {
            kind: IntegrityKind::DimensionMismatch,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code for the tool-response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config_error",
            EngineError::Storage(_) => "storage_error",
            EngineError::Embedding(_) => "embedding_service_error",
            EngineError::FileProcessing { .. } => "file_processing_error",
            EngineError::Search(_) => "search_error",
            EngineError::Timeout(_) => "timeout",
            EngineError::Validation(_) => "validation_error",
            EngineError::Integrity { .. } => "integrity_error",
        }
    }

    /// Remediation hint surfaced to tool callers.
    pub fn suggestion(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "Fix the configuration file and restart the engine.",
            EngineError::Storage(_) => {
                "Check that the data directory is writable and retry the operation."
            }
            EngineError::Embedding(_) => {
                "Verify the embedding service is running and reachable, then retry."
            }
            EngineError::FileProcessing { .. } => {
                "The file was skipped; fix or remove it and it will be picked up again."
            }
            EngineError::Search(_) => "Rephrase the query or try a different search type.",
            EngineError::Timeout(_) => {
                "Retry, or raise search_pipeline_timeout_ms if the index is large."
            }
            EngineError::Validation(_) => "Correct the argument and call the tool again.",
            EngineError::Integrity {
                kind: IntegrityKind::DimensionMismatch,
                ..
            } => "Run vector_db_force_sync with confirm=true to rebuild the index.",
            EngineError::Integrity { .. } => "Run vector_db_sync_check with autoFix=true.",
        }
    }

    /// Process exit code for fatal errors at the binary boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 1,
            EngineError::Storage(_) => 2,
            _ => 1,
        }
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Embedding(_) | EngineError::Timeout(_) | EngineError::Storage(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::FileProcessing {
            path: String::new(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::Config("x".into()).code(), "config_error");
        assert_eq!(
            EngineError::dimension_mismatch("384 vs 768").code(),
            "integrity_error"
        );
        assert_eq!(
            EngineError::Timeout(Duration::from_millis(10)).code(),
            "timeout"
        );
    }

    #[test]
    fn integrity_kind_renders_snake_case() {
        let err = EngineError::dimension_mismatch("stored=384 active=768");
        assert!(err.to_string().contains("dimension_mismatch"));
    }

    #[test]
    fn exit_codes_follow_severity() {
        assert_eq!(EngineError::Config("bad".into()).exit_code(), 1);
        assert_eq!(
            EngineError::Storage(sqlx::Error::PoolClosed).exit_code(),
            2
        );
    }
}
