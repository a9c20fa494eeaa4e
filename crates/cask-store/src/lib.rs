//! Content-addressable blob store with durable, multi-digest metadata.
//!
//! Every stored blob is identified by cryptographic digests over its bytes
//! and addressed by RFC6920 `ni:` URIs. The store remembers every object it
//! has ever held: live records pair with a blob on disk, tombstones keep
//! the metadata after the blob is erased, and cache records carry an expiry
//! instead of a deletion mark.
//!
//! # Layout
//!
//! One root directory holds the hashed blob tree (`store/`), blobs awaiting
//! settle (`tmp/`), and the metadata database (`meta.db`).
//!
//! # Example
//!
//! ```no_run
//! use cask_store::{AddOptions, Config, Store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(Config::new("/var/lib/cask"))?;
//! let object = store.add("some data", AddOptions::default())?;
//! assert!(object.fresh);
//!
//! let digest = object.best_digest().unwrap();
//! let found = store.get(digest)?.unwrap();
//! assert_eq!(found.blob.unwrap().read_to_vec()?, b"some data");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod store;

pub use config::{parse_size, Config};
pub use driver::{AddRequest, Driver, RedbDriver, Retrieved};
pub use error::{StoreError, StoreResult};
pub use store::{AddOptions, Key, Store};

// The vocabulary the API speaks, re-exported for downstream convenience.
pub use cask_meta::{Filter, Span, Stats};
pub use cask_types::{Algorithm, DigestUri, Object, Stamp};
