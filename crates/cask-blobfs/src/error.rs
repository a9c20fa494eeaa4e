use std::path::PathBuf;

/// Errors from the blob filesystem.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Setup could not create or permission the root directories. Unlike
    /// pruning, failures here are hard errors.
    #[error("failed to prepare blob directory {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The derived blob path exists but is not a readable regular file.
    #[error("corrupt blob at {path}: not a readable regular file")]
    CorruptBlob { path: PathBuf },

    /// I/O failure during settle, read, or erase.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for blob filesystem operations.
pub type BlobResult<T> = Result<T, BlobError>;
