/// Errors surfaced by the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Metadata engine failure (includes corrupt-state conditions).
    #[error(transparent)]
    Meta(#[from] cask_meta::MetaError),

    /// Blob filesystem failure (includes corrupt-blob conditions).
    #[error(transparent)]
    Blob(#[from] cask_blobfs::BlobError),

    /// Scan failure on a byte source.
    #[error(transparent)]
    Scan(#[from] cask_digest::ScanError),

    /// Malformed value-level input (tokens, digest identifiers).
    #[error(transparent)]
    Type(#[from] cask_types::TypeError),

    /// Malformed configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
