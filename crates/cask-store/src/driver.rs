//! The driver: blob store and metadata engine under one envelope.
//!
//! [`Driver`] is the seam between the public [`Store`](crate::Store) facade
//! and a concrete backend. [`RedbDriver`] is the shipped implementation:
//! every mutating operation opens one metadata write transaction, performs
//! its blob work while the transaction is open, and commits last, so a
//! failure anywhere aborts the whole operation and no partial settle
//! survives.

use std::fs;

use tracing::debug;

use cask_blobfs::{BlobFs, BlobHandle};
use cask_digest::{is_refinement, scan, MagicSniffer, MediaSniffer, ScanOutcome, Source};
use cask_meta::{Filter, MetaConfig, MetaDb, MetaKey, Stats};
use cask_types::{Algorithm, DigestUri, Object, Stamp};

use crate::config::Config;
use crate::error::StoreResult;

/// One `add` request, already normalized by the front-end.
pub struct AddRequest<'a> {
    /// The byte source to scan and store.
    pub source: Source<'a>,
    /// Caller-supplied media type (kept only if the detected type refines it).
    pub media_type: Option<String>,
    /// Character-set token.
    pub charset: Option<String>,
    /// Language tag.
    pub language: Option<String>,
    /// Content-encoding token.
    pub encoding: Option<String>,
    /// Content modification time; defaults to the source mtime, then now.
    pub mtime: Option<Stamp>,
    /// Keep the stored mtime on merge.
    pub preserve: bool,
}

impl<'a> AddRequest<'a> {
    /// A request with no metadata beyond the source.
    pub fn new(source: impl Into<Source<'a>>) -> Self {
        Self {
            source: source.into(),
            media_type: None,
            charset: None,
            language: None,
            encoding: None,
            mtime: None,
            preserve: false,
        }
    }
}

/// A record paired with its blob handle.
///
/// The handle is lazy unless the caller asked for a direct open, so listing
/// many objects does not consume file descriptors. Tombstones carry no
/// handle.
pub struct Retrieved {
    /// The metadata record.
    pub object: Object,
    /// A handle on the blob content, when one exists.
    pub blob: Option<BlobHandle>,
}

/// Backend seam: a blob store and a metadata store composed under one
/// transactional envelope.
pub trait Driver: Send + Sync {
    /// Scan a source, insert or merge its record, and settle its blob.
    fn add(&self, req: AddRequest<'_>) -> StoreResult<Object>;

    /// Look up one record and its blob.
    fn get(&self, key: &MetaKey<'_>, direct: bool) -> StoreResult<Option<Retrieved>>;

    /// Tombstone (or, with `forget`, purge) a record and erase its blob.
    /// The returned handle still reads the erased content.
    fn remove(&self, key: &MetaKey<'_>, forget: bool) -> StoreResult<Option<Retrieved>>;

    /// Aggregate statistics.
    fn stats(&self) -> StoreResult<Stats>;

    /// Multi-dimensional query.
    fn list(&self, filter: &Filter) -> StoreResult<Vec<Retrieved>>;

    /// The enabled algorithm set, canonical order.
    fn algorithms(&self) -> &[Algorithm];

    /// The primary algorithm.
    fn primary(&self) -> Algorithm;
}

/// The shipped driver: redb metadata plus the hashed blob tree.
pub struct RedbDriver {
    blobs: BlobFs,
    meta: MetaDb,
    sniffer: Box<dyn MediaSniffer>,
}

impl RedbDriver {
    /// Open (or create) a store under the configured root directory.
    pub fn open(config: &Config) -> StoreResult<Self> {
        fs::create_dir_all(&config.dir)?;
        let blobs = BlobFs::open(&config.dir, config.umask)?;
        let meta = MetaDb::open(
            &config.dir.join("meta.db"),
            MetaConfig {
                algorithms: config.algorithms.clone(),
                primary: config.primary,
                expiry: config.expiry,
                cache_bytes: config.mapsize.map(|n| n as usize),
            },
        )?;
        Ok(Self {
            blobs,
            meta,
            sniffer: Box::new(MagicSniffer),
        })
    }

    /// Replace the media-type oracle.
    pub fn with_sniffer(mut self, sniffer: Box<dyn MediaSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    /// Direct access to the metadata engine (for maintenance tooling).
    pub fn meta(&self) -> &MetaDb {
        &self.meta
    }

    /// Direct access to the blob tree (for maintenance tooling).
    pub fn blobs(&self) -> &BlobFs {
        &self.blobs
    }

    fn primary_digest<'o>(&self, obj: &'o Object) -> StoreResult<&'o DigestUri> {
        obj.digest(self.meta.primary())
            .ok_or_else(|| cask_meta::MetaError::MissingDigest(self.meta.primary()).into())
    }

    /// Apply the media-type precedence rules to a scan.
    fn effective_media_type(
        &self,
        supplied: Option<String>,
        outcome: &ScanOutcome,
        file_name: Option<&str>,
    ) -> String {
        let detected = self.sniffer.sniff(&outcome.sample, file_name);
        match supplied {
            // The caller's word stands when the detection only refines it.
            Some(wanted) if is_refinement(&detected, &wanted) => wanted,
            Some(_) | None => detected,
        }
    }
}

impl Driver for RedbDriver {
    fn add(&self, req: AddRequest<'_>) -> StoreResult<Object> {
        let file_name = req.source.file_name().map(str::to_owned);

        // Scan into a temp blob; a scan failure drops (and unlinks) it.
        let mut temp = self.blobs.temp()?;
        let outcome = scan(req.source, self.meta.algorithms(), Some(&mut temp))?;

        let media_type = self.effective_media_type(req.media_type, &outcome, file_name.as_deref());
        let mut incoming = Object::from_scan(outcome.digests, outcome.size);
        incoming.media_type = Some(media_type);
        incoming.charset = req.charset;
        incoming.language = req.language;
        incoming.encoding = req.encoding;
        if let Some(mtime) = req.mtime.or(outcome.source_mtime) {
            incoming.mtime = mtime;
        }

        let writer = self.meta.begin()?;
        let out = self.meta.set_meta(&writer, &incoming, req.preserve)?;
        if out.changed {
            let digest = self.primary_digest(&out.object)?;
            self.blobs
                .settle(digest, temp, Some(out.object.mtime), false)?;
        }
        // An unchanged record discards the temp blob: the settled copy is
        // already in place. Commit only after the blob work succeeded.
        writer.commit()?;

        let mut object = out.object;
        object.fresh = out.changed || out.resurrected;
        debug!(size = object.size, fresh = object.fresh, "add complete");
        Ok(object)
    }

    fn get(&self, key: &MetaKey<'_>, direct: bool) -> StoreResult<Option<Retrieved>> {
        let Some(object) = self.meta.get_meta(key)? else {
            return Ok(None);
        };
        let blob = if object.dtime.is_none() || object.is_cache() {
            self.blobs.get(self.primary_digest(&object)?, direct)?
        } else {
            None
        };
        Ok(Some(Retrieved { object, blob }))
    }

    fn remove(&self, key: &MetaKey<'_>, forget: bool) -> StoreResult<Option<Retrieved>> {
        let writer = self.meta.begin()?;
        let removed = if forget {
            self.meta.remove_meta(&writer, key)?
        } else {
            self.meta.mark_meta_deleted(&writer, key)?
        };
        let Some(object) = removed else {
            return Ok(None);
        };

        // Erase before commit so a filesystem failure aborts the
        // transaction. The handle keeps the unlinked content readable.
        let blob = self.blobs.erase(self.primary_digest(&object)?)?;
        writer.commit()?;

        debug!(forget, "remove complete");
        Ok(Some(Retrieved { object, blob }))
    }

    fn stats(&self) -> StoreResult<Stats> {
        Ok(self.meta.stats()?)
    }

    fn list(&self, filter: &Filter) -> StoreResult<Vec<Retrieved>> {
        let objects = self.meta.list(filter)?;
        let mut out = Vec::with_capacity(objects.len());
        for object in objects {
            let blob = if object.dtime.is_none() || object.is_cache() {
                self.blobs.get(self.primary_digest(&object)?, false)?
            } else {
                None
            };
            out.push(Retrieved { object, blob });
        }
        Ok(out)
    }

    fn algorithms(&self) -> &[Algorithm] {
        self.meta.algorithms()
    }

    fn primary(&self) -> Algorithm {
        self.meta.primary()
    }
}
