/// Errors that can occur within the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (channel config column).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A rule query did not produce the single scalar integer the alert
    /// engine requires.
    #[error("Storage: scalar query returned the wrong shape: {0}")]
    ScalarShape(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
