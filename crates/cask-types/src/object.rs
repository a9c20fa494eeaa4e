use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::digest::DigestUri;
use crate::flags::Flags;
use crate::stamp::Stamp;

/// The media type assigned when nothing better is known.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// One stored item: its digests, size, timestamps, user-manipulable
/// attributes, and validation flags.
///
/// An `Object` is a value record. The digests and `size` are fixed by the
/// content scan; `ctime` is fixed at first insert; `ptime` is maintained by
/// the metadata engine; everything else is user-settable through `add`.
///
/// Liveness is encoded in `dtime` and the cache bit:
/// - `dtime = None`: live, blob on disk
/// - `dtime = Some(_)` with the cache bit clear: tombstone, blob erased
/// - cache bit set: `dtime` is an expiry time, past or future
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Digest identifiers, one per enabled algorithm.
    pub digests: BTreeMap<Algorithm, DigestUri>,
    /// Content length in bytes.
    pub size: u64,
    /// First-insert time. Never changes after creation.
    pub ctime: Stamp,
    /// Content modification time, user-settable.
    pub mtime: Stamp,
    /// Record ("property") modification time, engine-maintained.
    pub ptime: Stamp,
    /// Deletion or cache-expiry time.
    pub dtime: Option<Stamp>,
    /// Media type token.
    pub media_type: Option<String>,
    /// Natural-language tag.
    pub language: Option<String>,
    /// Character-set token.
    pub charset: Option<String>,
    /// Content-encoding token.
    pub encoding: Option<String>,
    /// Validation flags and cache bit.
    pub flags: Flags,
    /// Whether the operation that returned this object created or changed
    /// the record. Transient; never persisted.
    #[serde(skip)]
    pub fresh: bool,
}

impl Object {
    /// A blank record for the given scan output; timestamps zeroed until the
    /// engine assigns them.
    pub fn from_scan(digests: BTreeMap<Algorithm, DigestUri>, size: u64) -> Self {
        Self {
            digests,
            size,
            ctime: Stamp::from_micros(0),
            mtime: Stamp::from_micros(0),
            ptime: Stamp::from_micros(0),
            dtime: None,
            media_type: None,
            language: None,
            charset: None,
            encoding: None,
            flags: Flags::new(),
            fresh: false,
        }
    }

    /// The digest under one algorithm, if the record carries it.
    pub fn digest(&self, algorithm: Algorithm) -> Option<&DigestUri> {
        self.digests.get(&algorithm)
    }

    /// The strongest digest available (largest algorithm in canonical
    /// order). Records always carry at least one digest in practice.
    pub fn best_digest(&self) -> Option<&DigestUri> {
        self.digests.values().next_back()
    }

    /// `true` when the record is live: no deletion time recorded.
    pub fn is_live(&self) -> bool {
        self.dtime.is_none()
    }

    /// `true` when the record is a tombstone: deleted and not a cache entry.
    pub fn is_tombstone(&self) -> bool {
        self.dtime.is_some() && !self.flags.is_cache()
    }

    /// `true` when the record is a cache entry.
    pub fn is_cache(&self) -> bool {
        self.flags.is_cache()
    }

    /// The effective media type, falling back to the default.
    pub fn media_type_or_default(&self) -> &str {
        self.media_type.as_deref().unwrap_or(DEFAULT_MEDIA_TYPE)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Object");
        match self.best_digest() {
            Some(digest) => d.field("digest", digest),
            None => d.field("digest", &"<none>"),
        };
        d.field("size", &self.size)
            .field("type", &self.media_type_or_default())
            .field("dtime", &self.dtime)
            .field("cache", &self.flags.is_cache())
            .field("fresh", &self.fresh)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(algorithm: Algorithm, fill: u8) -> DigestUri {
        DigestUri::new(algorithm, vec![fill; algorithm.digest_len()]).unwrap()
    }

    fn sample() -> Object {
        let mut digests = BTreeMap::new();
        digests.insert(Algorithm::Md5, digest(Algorithm::Md5, 1));
        digests.insert(Algorithm::Sha256, digest(Algorithm::Sha256, 2));
        digests.insert(Algorithm::Sha512, digest(Algorithm::Sha512, 3));
        Object::from_scan(digests, 42)
    }

    #[test]
    fn best_digest_prefers_largest_algorithm() {
        let obj = sample();
        assert_eq!(obj.best_digest().unwrap().algorithm(), Algorithm::Sha512);
    }

    #[test]
    fn liveness_states() {
        let mut obj = sample();
        assert!(obj.is_live());
        assert!(!obj.is_tombstone());

        obj.dtime = Some(Stamp::from_unix_secs(100));
        assert!(!obj.is_live());
        assert!(obj.is_tombstone());

        obj.flags.set_cache(true);
        assert!(!obj.is_tombstone());
        assert!(obj.is_cache());
    }

    #[test]
    fn default_media_type() {
        let mut obj = sample();
        assert_eq!(obj.media_type_or_default(), DEFAULT_MEDIA_TYPE);
        obj.media_type = Some("text/plain".into());
        assert_eq!(obj.media_type_or_default(), "text/plain");
    }
}
