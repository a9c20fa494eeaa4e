//! Value types for the cask blob store.
//!
//! Everything here is a plain value: digest identifiers and their RFC6920
//! `ni:` URI form, the object record with its timestamps and validation
//! flags, and the token grammar for user-supplied metadata. The persistence
//! crates (`cask-meta`, `cask-blobfs`) consume these types; nothing in this
//! crate touches the filesystem.

pub mod algorithm;
pub mod digest;
pub mod error;
pub mod flags;
pub mod object;
pub mod stamp;
pub mod token;

// Re-export primary types at crate root for ergonomic imports.
pub use algorithm::Algorithm;
pub use digest::DigestUri;
pub use error::{TypeError, TypeResult};
pub use flags::{Check, Flags, Verdict};
pub use object::{Object, DEFAULT_MEDIA_TYPE};
pub use stamp::Stamp;
pub use token::TokenKind;
