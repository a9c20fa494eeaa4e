//! On-disk blob storage for the cask store.
//!
//! Blobs live in a hashed directory tree under `store/`, keyed by the
//! lower-case Base32 form of the primary digest split `4/4/4/rest`. Writes
//! stream into `tmp/` and are finalized by an atomic rename ("settle");
//! erases unlink the blob and prune now-empty ancestors best-effort.
//!
//! This crate knows nothing about metadata: pairing blobs with records is
//! the driver's job.

pub mod blobfs;
pub mod error;
pub mod layout;

pub use blobfs::{BlobFs, BlobHandle, TempBlob};
pub use error::{BlobError, BlobResult};
pub use layout::{relative_blob_path, DEFAULT_UMASK};
