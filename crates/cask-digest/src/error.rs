/// Errors from scanning a byte source.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// I/O failure reading the source or writing the tee sink.
    #[error("I/O error during scan: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;
