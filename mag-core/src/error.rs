//! Error types for mag operations

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MagError {
    #[error("Cannot read codebase root {}: {message}", .path.display())]
    Discovery { path: PathBuf, message: String },

    #[error("Parse error for {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Embedding error: {message}")]
    Embedding { message: String, transient: bool },

    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Index write failed for {path}: {message}")]
    IndexWrite { path: String, message: String },

    #[error("Embedding dimension mismatch: index holds {expected}-d vectors, got {found}. Run 'mag-index --clear' to rebuild.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Path escapes the codebase root: {0}")]
    PathOutsideRoot(String),

    #[error("Not a mag codebase (no .mag directory). Run 'mag-index' first.")]
    NotInitialized,

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Invalid filter type: {0}")]
    InvalidFilter(String),

    #[error("Schema version mismatch: database is v{found}, expected v{expected}. Run 'mag-index --clear' to reindex.")]
    SchemaVersionMismatch { found: i32, expected: i32 },

    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MagError {
    pub(crate) fn embedding(message: impl Into<String>, transient: bool) -> Self {
        Self::Embedding {
            message: message.into(),
            transient,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Embedding { transient: true, .. })
    }

    /// Storage failures that make every further write pointless.
    pub fn is_storage_fatal(&self) -> bool {
        use rusqlite::ErrorCode;

        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::DiskFull
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::ReadOnly
                    | ErrorCode::PermissionDenied
            ),
            Self::Io(_) | Self::SchemaVersionMismatch { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_only_for_retryable_embedding_errors() {
        assert!(MagError::embedding("timeout", true).is_transient());
        assert!(!MagError::embedding("bad model", false).is_transient());
        assert!(!MagError::BackendUnavailable("down".into()).is_transient());
    }

    #[test]
    fn test_storage_fatal_classification() {
        let full = MagError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(full.is_storage_fatal());

        let constraint = MagError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!constraint.is_storage_fatal());
        assert!(!MagError::DimensionMismatch {
            expected: 3,
            found: 4
        }
        .is_storage_fatal());
    }
}
