//! The public store facade.
//!
//! `Store` normalizes caller input (token grammar, key coercion) and hands
//! everything else to its [`Driver`]. It is deliberately thin: the
//! interesting semantics live in `cask-meta` and `cask-blobfs`.

use std::io::Read;
use std::path::Path;

use cask_digest::{scan, Source};
use cask_meta::{Filter, MetaKey, Stats};
use cask_types::{token, Algorithm, DigestUri, Object, Stamp, TokenKind};

use crate::config::Config;
use crate::driver::{AddRequest, Driver, RedbDriver, Retrieved};
use crate::error::StoreResult;

/// Options accepted by [`Store::add`].
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    /// Claimed media type; kept only when the detected type refines it.
    pub media_type: Option<String>,
    /// Character-set token.
    pub charset: Option<String>,
    /// Language tag.
    pub language: Option<String>,
    /// Content-encoding token.
    pub encoding: Option<String>,
    /// Content modification time; defaults to the source mtime, then now.
    pub mtime: Option<Stamp>,
    /// Reject malformed tokens instead of dropping them.
    pub strict: bool,
    /// Keep the stored mtime when merging into an existing record.
    pub preserve: bool,
}

/// A lookup key for `get`, `remove`, and `forget`.
///
/// Digest identifiers and objects resolve through the metadata engine
/// directly; byte sources are scanned first and resolved by their digests.
pub enum Key<'a> {
    /// An `ni:` digest identifier.
    Uri(&'a DigestUri),
    /// An object carrying digests.
    Object(&'a Object),
    /// An in-memory byte string.
    Bytes(&'a [u8]),
    /// A file on disk.
    Path(&'a Path),
    /// An arbitrary reader, consumed to EOF.
    Reader(Box<dyn Read + 'a>),
}

impl<'a> From<&'a DigestUri> for Key<'a> {
    fn from(uri: &'a DigestUri) -> Self {
        Key::Uri(uri)
    }
}

impl<'a> From<&'a Object> for Key<'a> {
    fn from(obj: &'a Object) -> Self {
        Key::Object(obj)
    }
}

impl<'a> From<&'a [u8]> for Key<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Key::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(s: &'a str) -> Self {
        Key::Bytes(s.as_bytes())
    }
}

impl<'a> From<&'a Path> for Key<'a> {
    fn from(path: &'a Path) -> Self {
        Key::Path(path)
    }
}

/// A content-addressable blob store with durable multi-digest metadata.
pub struct Store<D: Driver = RedbDriver> {
    driver: D,
}

impl Store<RedbDriver> {
    /// Open (or create) a store with the shipped redb driver.
    pub fn open(config: Config) -> StoreResult<Self> {
        Ok(Self {
            driver: RedbDriver::open(&config)?,
        })
    }
}

impl<D: Driver> Store<D> {
    /// Wrap an already-constructed driver.
    pub fn with_driver(driver: D) -> Self {
        Self { driver }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The enabled algorithm set, canonical order.
    pub fn algorithms(&self) -> &[Algorithm] {
        self.driver.algorithms()
    }

    /// The primary algorithm.
    pub fn primary(&self) -> Algorithm {
        self.driver.primary()
    }

    /// Scan a source and insert or merge its record.
    ///
    /// Returns the stored record; `fresh` is set when the call created,
    /// changed, or resurrected it.
    pub fn add<'a>(
        &self,
        source: impl Into<Source<'a>>,
        opts: AddOptions,
    ) -> StoreResult<Object> {
        let req = AddRequest {
            source: source.into(),
            media_type: clean_token(TokenKind::MediaType, opts.media_type, opts.strict)?,
            charset: clean_token(TokenKind::Charset, opts.charset, opts.strict)?,
            language: clean_token(TokenKind::Language, opts.language, opts.strict)?,
            encoding: clean_token(TokenKind::Encoding, opts.encoding, opts.strict)?,
            mtime: opts.mtime,
            preserve: opts.preserve,
        };
        self.driver.add(req)
    }

    /// Look up a record (and a lazy blob handle) by any key kind.
    pub fn get<'a>(&self, key: impl Into<Key<'a>>) -> StoreResult<Option<Retrieved>> {
        self.lookup(key.into(), |meta_key| self.driver.get(meta_key, false))
    }

    /// Tombstone a record: the blob is erased, the record is retained with
    /// `dtime` set. The returned handle still reads the erased content.
    pub fn remove<'a>(&self, key: impl Into<Key<'a>>) -> StoreResult<Option<Retrieved>> {
        self.lookup(key.into(), |meta_key| self.driver.remove(meta_key, false))
    }

    /// Forget a record entirely: blob, entry, and every index row.
    pub fn forget<'a>(&self, key: impl Into<Key<'a>>) -> StoreResult<Option<Retrieved>> {
        self.lookup(key.into(), |meta_key| self.driver.remove(meta_key, true))
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> StoreResult<Stats> {
        self.driver.stats()
    }

    /// Multi-dimensional query. Handles are lazy, so large result sets do
    /// not exhaust file descriptors.
    pub fn list(&self, filter: &Filter) -> StoreResult<Vec<Retrieved>> {
        self.driver.list(filter)
    }

    /// Coerce a key into a metadata lookup, scanning byte sources.
    fn lookup<T>(
        &self,
        key: Key<'_>,
        op: impl FnOnce(&MetaKey<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        match key {
            Key::Uri(uri) => op(&MetaKey::Digest(uri)),
            Key::Object(obj) => op(&MetaKey::Object(obj)),
            Key::Bytes(bytes) => {
                let scanned = self.scan_to_object(Source::Bytes(bytes))?;
                op(&MetaKey::Object(&scanned))
            }
            Key::Path(path) => {
                let scanned = self.scan_to_object(Source::Path(path))?;
                op(&MetaKey::Object(&scanned))
            }
            Key::Reader(reader) => {
                let scanned = self.scan_to_object(Source::Reader(reader))?;
                op(&MetaKey::Object(&scanned))
            }
        }
    }

    fn scan_to_object(&self, source: Source<'_>) -> StoreResult<Object> {
        let outcome = scan(source, self.driver.algorithms(), None)?;
        Ok(Object::from_scan(outcome.digests, outcome.size))
    }
}

fn clean_token(
    kind: TokenKind,
    raw: Option<String>,
    strict: bool,
) -> StoreResult<Option<String>> {
    match raw {
        None => Ok(None),
        Some(raw) => Ok(token::clean(kind, &raw, strict)?),
    }
}
