use cask_types::Algorithm;

/// Errors from the metadata engine.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Failure in the underlying key-value store.
    #[error("metadata backend: {0}")]
    Backend(#[from] redb::Error),

    /// The control table's `version` key holds an unrecognized value.
    #[error("unrecognized schema version {0:?}")]
    UnknownSchemaVersion(String),

    /// A persisted entry record does not match the schema.
    #[error("corrupt entry record {id}: {reason}")]
    CorruptRecord { id: u64, reason: String },

    /// A control value failed to decode.
    #[error("corrupt control value for {key:?}")]
    CorruptControl { key: &'static str },

    /// A digest-table row points at an entry that does not exist.
    #[error("dangling {algorithm} digest row for entry {id}")]
    DanglingDigest { algorithm: Algorithm, id: u64 },

    /// A write would attach one digest to two distinct blobs. The engine
    /// assumes the primary digest is collision-free and refuses the write
    /// rather than silently merging records.
    #[error("digest collision on {algorithm} involving entry {entry}")]
    DigestCollision { algorithm: Algorithm, entry: u64 },

    /// The incoming object lacks a digest for an enabled algorithm.
    #[error("object is missing its {0} digest")]
    MissingDigest(Algorithm),

    /// The supplied configuration disagrees with the on-disk control table.
    #[error("store configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// Value-level error (digest lengths, algorithm tokens).
    #[error(transparent)]
    Type(#[from] cask_types::TypeError),
}

/// Result alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

// redb reports distinct error types per phase; funnel them all through
// `redb::Error` so call sites can use `?` uniformly.
macro_rules! backend_from {
    ($($ty:ty),* $(,)?) => {
        $(impl From<$ty> for MetaError {
            fn from(e: $ty) -> Self {
                MetaError::Backend(e.into())
            }
        })*
    };
}

backend_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
