//! The transactional metadata engine.
//!
//! One redb database holds the control table, the integer-keyed entry
//! table, one digest-resolution table per algorithm, and the secondary
//! indexes. All mutation happens through [`MetaWriter`], a thin wrapper
//! over a single serializable write transaction: counters, digest rows, and
//! index rows always change atomically with the entry they describe.
//! Readers run on snapshots and never block the writer.

use std::path::Path;
use std::time::Duration;

use redb::{Database, ReadableTable, WriteTransaction};
use tracing::debug;

use cask_types::{Algorithm, DigestUri, Flags, Object, Stamp};

use crate::error::{MetaError, MetaResult};
use crate::record;
use crate::schema::{
    self, bump_control_u64, control_keys, counted_deleted, digest_table, update_indexes,
    write_control_u64, Detected, CONTROL, ENTRY,
};

/// Configuration for opening a metadata database.
///
/// `algorithms` and `primary` are fixed at store creation; passing `Some`
/// when opening an existing store asserts they match what is on disk.
#[derive(Clone, Debug)]
pub struct MetaConfig {
    /// Enabled digest algorithms. `None` means all supported (new store) or
    /// whatever the store was created with (existing store).
    pub algorithms: Option<Vec<Algorithm>>,
    /// The primary algorithm. `None` defaults to sha-256 on creation.
    pub primary: Option<Algorithm>,
    /// Cache-entry lifetime used when an expiry must be assigned.
    pub expiry: Duration,
    /// Cache budget for the engine, from the `mapsize` option.
    pub cache_bytes: Option<usize>,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            algorithms: None,
            primary: None,
            expiry: Duration::from_secs(86_400),
            cache_bytes: None,
        }
    }
}

/// A key that resolves to one entry.
#[derive(Clone, Copy, Debug)]
pub enum MetaKey<'a> {
    /// A raw entry id.
    Id(u64),
    /// Any digest the record carries.
    Digest(&'a DigestUri),
    /// An object carrying digests; the strongest available one is used.
    Object(&'a Object),
}

impl From<u64> for MetaKey<'static> {
    fn from(id: u64) -> Self {
        MetaKey::Id(id)
    }
}

impl<'a> From<&'a DigestUri> for MetaKey<'a> {
    fn from(digest: &'a DigestUri) -> Self {
        MetaKey::Digest(digest)
    }
}

impl<'a> From<&'a Object> for MetaKey<'a> {
    fn from(obj: &'a Object) -> Self {
        MetaKey::Object(obj)
    }
}

/// Result of a `set_meta` call.
#[derive(Clone, Debug)]
pub struct SetOutcome {
    /// The entry id the record landed under.
    pub id: u64,
    /// The merged record as persisted.
    pub object: Object,
    /// Whether anything was written. An identical re-add is `false`.
    pub changed: bool,
    /// Whether the write cleared a deletion time.
    pub resurrected: bool,
}

/// One open write transaction over the metadata database.
///
/// The wall-clock instant is captured once at `begin`, so every timestamp
/// the enclosed operations assign agrees.
pub struct MetaWriter {
    pub(crate) txn: WriteTransaction,
    now: Stamp,
}

impl MetaWriter {
    /// The instant this transaction observes as "now".
    pub fn now(&self) -> Stamp {
        self.now
    }

    /// Commit the transaction. Dropping the writer instead aborts it.
    pub fn commit(self) -> MetaResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}

/// The metadata database handle. Shared by all threads; the underlying
/// store serializes writers and snapshots readers.
#[derive(Debug)]
pub struct MetaDb {
    db: Database,
    algorithms: Vec<Algorithm>,
    primary: Algorithm,
    expiry_micros: u64,
}

impl MetaDb {
    /// Open (or create) the metadata database at `path`.
    ///
    /// A new database is initialized as schema v1; a populated control
    /// table without a `version` key is a v0 store and upgraded in place;
    /// any other version value is corrupt state.
    pub fn open(path: &Path, config: MetaConfig) -> MetaResult<Self> {
        let mut builder = Database::builder();
        if let Some(bytes) = config.cache_bytes {
            builder.set_cache_size(bytes);
        }
        let db = builder.create(path)?;

        let now = Stamp::now();
        let txn = db.begin_write()?;
        let (algorithms, primary, expiry_micros) = match schema::detect(&txn)? {
            Detected::Fresh => {
                let algorithms = config
                    .algorithms
                    .clone()
                    .unwrap_or_else(|| Algorithm::ALL.to_vec());
                let primary = config.primary.unwrap_or(Algorithm::Sha256);
                if !algorithms.contains(&primary) {
                    return Err(MetaError::ConfigMismatch(format!(
                        "primary algorithm {primary} is not in the enabled set"
                    )));
                }
                let expiry = config.expiry.as_micros() as u64;
                schema::init_control(&txn, &algorithms, primary, expiry, now)?;
                schema::ensure_tables(&txn, &algorithms)?;
                debug!(algorithms = %Algorithm::format_set(&algorithms), %primary, "initialized v1 store");
                (algorithms, primary, expiry)
            }
            Detected::V0 => {
                let identity = Self::read_identity(&txn, &config)?;
                schema::upgrade_v0(&txn, &identity.0, now)?;
                identity
            }
            Detected::V1 => Self::read_identity(&txn, &config)?,
        };
        txn.commit()?;

        Ok(Self {
            db,
            algorithms,
            primary,
            expiry_micros,
        })
    }

    /// Read store identity from the control table, asserting any explicit
    /// configuration against it.
    fn read_identity(
        txn: &WriteTransaction,
        config: &MetaConfig,
    ) -> MetaResult<(Vec<Algorithm>, Algorithm, u64)> {
        let control = txn.open_table(CONTROL)?;

        let algorithms = schema::read_control_str(&control, control_keys::ALGORITHMS)?.ok_or(
            MetaError::CorruptControl {
                key: control_keys::ALGORITHMS,
            },
        )?;
        let algorithms = Algorithm::parse_set(&algorithms)?;

        let primary = schema::read_control_str(&control, control_keys::PRIMARY)?.ok_or(
            MetaError::CorruptControl {
                key: control_keys::PRIMARY,
            },
        )?;
        let primary: Algorithm = primary.parse()?;

        let expiry = schema::read_control_u64(&control, control_keys::EXPIRY)?
            .unwrap_or(config.expiry.as_micros() as u64);

        if let Some(want) = &config.algorithms {
            let mut want = want.clone();
            want.sort();
            want.dedup();
            if want != algorithms {
                return Err(MetaError::ConfigMismatch(format!(
                    "store has algorithms {}, asked for {}",
                    Algorithm::format_set(&algorithms),
                    Algorithm::format_set(&want),
                )));
            }
        }
        if let Some(want) = config.primary {
            if want != primary {
                return Err(MetaError::ConfigMismatch(format!(
                    "store primary is {primary}, asked for {want}"
                )));
            }
        }

        Ok((algorithms, primary, expiry))
    }

    /// The enabled algorithm set, canonical order.
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// The primary algorithm.
    pub fn primary(&self) -> Algorithm {
        self.primary
    }

    /// The cache-entry lifetime.
    pub fn expiry(&self) -> Duration {
        Duration::from_micros(self.expiry_micros)
    }

    /// Begin a write transaction. Blocks while another writer is active.
    pub fn begin(&self) -> MetaResult<MetaWriter> {
        Ok(MetaWriter {
            txn: self.db.begin_write()?,
            now: Stamp::now(),
        })
    }

    pub(crate) fn read_txn(&self) -> MetaResult<redb::ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    // ---------------------------------------------------------------
    // set_meta
    // ---------------------------------------------------------------

    /// Insert or merge a record inside the given write transaction.
    ///
    /// Returns the merged record and whether anything changed. `size`,
    /// `ctime`, and the digests of an existing record are pinned; `mtime`
    /// follows the preserve rule; tokens are taken from the incoming object
    /// when supplied; `dtime` follows the cache/tombstone state machine.
    /// An incoming record identical to the stored one is a no-op.
    pub fn set_meta(
        &self,
        w: &MetaWriter,
        incoming: &Object,
        preserve: bool,
    ) -> MetaResult<SetOutcome> {
        for &algo in &self.algorithms {
            if !incoming.digests.contains_key(&algo) {
                return Err(MetaError::MissingDigest(algo));
            }
        }

        // Resolve through every digest table, strongest first. All rows
        // that exist must agree on the entry id; disagreement means a
        // secondary-hash collision and the write is refused.
        let mut resolved: Option<u64> = None;
        for &algo in self.algorithms.iter().rev() {
            let digest = &incoming.digests[&algo];
            let table = w.txn.open_table(digest_table(algo))?;
            let found = table.get(digest.as_bytes())?.map(|guard| guard.value());
            if let Some(id) = found {
                match resolved {
                    None => resolved = Some(id),
                    Some(prev) if prev != id => {
                        return Err(MetaError::DigestCollision {
                            algorithm: algo,
                            entry: prev,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        match resolved {
            Some(id) => self.merge_existing(w, id, incoming, preserve),
            None => self.create_entry(w, incoming),
        }
    }

    fn create_entry(&self, w: &MetaWriter, incoming: &Object) -> MetaResult<SetOutcome> {
        let now = w.now;

        let mut obj = incoming.clone();
        obj.fresh = false;
        obj.ctime = now;
        if obj.mtime.as_micros() == 0 {
            obj.mtime = now;
        }
        obj.ptime = now;
        // A cache record created without an explicit expiry gets one.
        if obj.flags.is_cache() && obj.dtime.is_none() {
            obj.dtime = Some(now.plus(Duration::from_micros(self.expiry_micros)));
        }

        let packed = record::pack(&obj, &self.algorithms)?;
        let id = {
            let mut entry = w.txn.open_table(ENTRY)?;
            // 0 is reserved; ids grow past the current maximum and are
            // never reused while a record exists.
            let id = entry.last()?.map_or(1, |(k, _)| k.value() + 1);
            entry.insert(&id, packed.as_slice())?;
            id
        };

        for &algo in &self.algorithms {
            let digest = &obj.digests[&algo];
            let mut table = w.txn.open_table(digest_table(algo))?;
            table.insert(digest.as_bytes(), &id)?;
        }
        update_indexes(&w.txn, id, None, Some(&obj))?;

        {
            let mut control = w.txn.open_table(CONTROL)?;
            bump_control_u64(&mut control, control_keys::OBJECTS, 1)?;
            if counted_deleted(&obj, now) {
                bump_control_u64(&mut control, control_keys::DELETED, 1)?;
            } else {
                bump_control_u64(&mut control, control_keys::BYTES, obj.size as i64)?;
            }
            write_control_u64(&mut control, control_keys::MTIME, now.as_micros())?;
        }

        debug!(id, size = obj.size, "created entry");
        Ok(SetOutcome {
            id,
            object: obj,
            changed: true,
            resurrected: false,
        })
    }

    fn merge_existing(
        &self,
        w: &MetaWriter,
        id: u64,
        incoming: &Object,
        preserve: bool,
    ) -> MetaResult<SetOutcome> {
        let now = w.now;
        let old = self
            .load_in_write(&w.txn, id)?
            .ok_or(MetaError::DanglingDigest {
                algorithm: self.primary,
                id,
            })?;

        // A partial digest match is a secondary-hash collision: the bytes
        // differ under at least one algorithm, so this is not the same blob.
        for &algo in &self.algorithms {
            if incoming.digests.get(&algo) != old.digests.get(&algo) {
                return Err(MetaError::DigestCollision {
                    algorithm: algo,
                    entry: id,
                });
            }
        }

        // size, ctime, and digests are pinned from the stored record.
        let mut merged = old.clone();

        if !preserve && incoming.mtime.as_micros() != 0 {
            merged.mtime = incoming.mtime;
        }

        if incoming.media_type.is_some() {
            merged.media_type = incoming.media_type.clone();
        }
        if incoming.language.is_some() {
            merged.language = incoming.language.clone();
        }
        if incoming.charset.is_some() {
            merged.charset = incoming.charset.clone();
        }
        if incoming.encoding.is_some() {
            merged.encoding = incoming.encoding.clone();
        }

        // Validation verdicts are adopted wholesale when the incoming
        // record carries any; the cache bit is settled separately below.
        if incoming.flags.bits() & 0xff != 0 {
            let cache = merged.flags.is_cache();
            merged.flags = Flags::from_bits(incoming.flags.bits() & 0xff).with_cache(cache);
        }

        let was_cache = old.flags.is_cache();
        let is_cache = incoming.flags.is_cache();
        let was_tombstone = !was_cache && old.dtime.is_some_and(|d| d <= now);
        let expiry = Duration::from_micros(self.expiry_micros);

        match (was_cache, is_cache) {
            // Cache stays cache: no explicit expiry pushes it out to at
            // least now + expiry.
            (true, true) => {
                merged.dtime = match incoming.dtime {
                    Some(d) => Some(d),
                    None => {
                        let bumped = now.plus(expiry);
                        Some(old.dtime.map_or(bumped, |d| d.max(bumped)))
                    }
                };
            }
            // Live records never downgrade to cache; only a tombstone can
            // come back as a cache entry.
            (false, true) => {
                if was_tombstone {
                    merged.flags.set_cache(true);
                    merged.dtime = incoming.dtime.or(Some(now.plus(expiry)));
                } else {
                    merged.flags.set_cache(false);
                    merged.dtime = incoming.dtime;
                }
            }
            // Promotion to live: expiry no longer applies; a supplied
            // dtime keeps the record deleted, now as a plain tombstone.
            (true, false) => {
                merged.flags.set_cache(false);
                merged.dtime = incoming.dtime;
            }
            // Plain records honor the supplied dtime (tombstone toggle;
            // `None` resurrects).
            (false, false) => {
                merged.dtime = incoming.dtime;
            }
        }

        let old_packed = record::pack(&old, &self.algorithms)?;
        let merged_packed = record::pack(&merged, &self.algorithms)?;
        if old_packed == merged_packed {
            return Ok(SetOutcome {
                id,
                object: old,
                changed: false,
                resurrected: false,
            });
        }

        merged.ptime = now;
        self.write_merged(w, id, &old, &merged)?;

        let resurrected = old.dtime.is_some() && merged.dtime.is_none();
        debug!(id, resurrected, "updated entry");
        Ok(SetOutcome {
            id,
            object: merged,
            changed: true,
            resurrected,
        })
    }

    /// Persist a merged record: entry row, index moves, counter deltas.
    fn write_merged(
        &self,
        w: &MetaWriter,
        id: u64,
        old: &Object,
        merged: &Object,
    ) -> MetaResult<()> {
        let now = w.now;
        let packed = record::pack(merged, &self.algorithms)?;
        {
            let mut entry = w.txn.open_table(ENTRY)?;
            entry.insert(&id, packed.as_slice())?;
        }
        update_indexes(&w.txn, id, Some(old), Some(merged))?;

        let old_deleted = counted_deleted(old, now);
        let new_deleted = counted_deleted(merged, now);
        let mut control = w.txn.open_table(CONTROL)?;
        match (old_deleted, new_deleted) {
            (false, true) => {
                bump_control_u64(&mut control, control_keys::DELETED, 1)?;
                bump_control_u64(&mut control, control_keys::BYTES, -(old.size as i64))?;
            }
            (true, false) => {
                bump_control_u64(&mut control, control_keys::DELETED, -1)?;
                bump_control_u64(&mut control, control_keys::BYTES, merged.size as i64)?;
            }
            _ => {}
        }
        write_control_u64(&mut control, control_keys::MTIME, now.as_micros())?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Deletion
    // ---------------------------------------------------------------

    /// Tombstone a record: set `dtime = now`, move its index membership,
    /// and adjust counters. Already-tombstoned records are a no-op.
    pub fn mark_meta_deleted(
        &self,
        w: &MetaWriter,
        key: &MetaKey<'_>,
    ) -> MetaResult<Option<Object>> {
        let now = w.now;
        let Some(id) = self.resolve_in_write(&w.txn, key)? else {
            return Ok(None);
        };
        let Some(old) = self.load_in_write(&w.txn, id)? else {
            return Ok(None);
        };

        if old.is_tombstone() {
            return Ok(Some(old));
        }

        let mut merged = old.clone();
        merged.dtime = Some(now);
        merged.flags.set_cache(false);
        merged.ptime = now;

        self.write_merged(w, id, &old, &merged)?;
        debug!(id, "tombstoned entry");
        Ok(Some(merged))
    }

    /// Forget a record entirely: purge the entry row, its digest rows, and
    /// every secondary-index row, and adjust counters.
    pub fn remove_meta(&self, w: &MetaWriter, key: &MetaKey<'_>) -> MetaResult<Option<Object>> {
        let now = w.now;
        let Some(id) = self.resolve_in_write(&w.txn, key)? else {
            return Ok(None);
        };
        let Some(old) = self.load_in_write(&w.txn, id)? else {
            return Ok(None);
        };

        {
            let mut entry = w.txn.open_table(ENTRY)?;
            entry.remove(&id)?;
        }
        for (&algo, digest) in &old.digests {
            let mut table = w.txn.open_table(digest_table(algo))?;
            table.remove(digest.as_bytes())?;
        }
        update_indexes(&w.txn, id, Some(&old), None)?;

        {
            let mut control = w.txn.open_table(CONTROL)?;
            bump_control_u64(&mut control, control_keys::OBJECTS, -1)?;
            if counted_deleted(&old, now) {
                bump_control_u64(&mut control, control_keys::DELETED, -1)?;
            } else {
                bump_control_u64(&mut control, control_keys::BYTES, -(old.size as i64))?;
            }
            write_control_u64(&mut control, control_keys::MTIME, now.as_micros())?;
        }

        debug!(id, "forgot entry");
        Ok(Some(old))
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Look up one record on a read snapshot.
    pub fn get_meta(&self, key: &MetaKey<'_>) -> MetaResult<Option<Object>> {
        let txn = self.read_txn()?;

        let id = match key {
            MetaKey::Id(id) => Some(*id),
            MetaKey::Digest(digest) => {
                if !self.algorithms.contains(&digest.algorithm()) {
                    return Ok(None);
                }
                let table = txn.open_table(digest_table(digest.algorithm()))?;
                table.get(digest.as_bytes())?.map(|g| g.value())
            }
            MetaKey::Object(obj) => {
                let mut found = None;
                for &algo in self.algorithms.iter().rev() {
                    if let Some(digest) = obj.digests.get(&algo) {
                        let table = txn.open_table(digest_table(algo))?;
                        if let Some(guard) = table.get(digest.as_bytes())? {
                            found = Some(guard.value());
                            break;
                        }
                    }
                }
                found
            }
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let entry = txn.open_table(ENTRY)?;
        match entry.get(&id)? {
            None => Ok(None),
            Some(guard) => record::unpack(guard.value(), &self.algorithms, id).map(Some),
        }
    }

    /// Current counter values: `(objects, deleted, bytes)`.
    pub fn counters(&self) -> MetaResult<(u64, u64, u64)> {
        let txn = self.read_txn()?;
        let control = txn.open_table(CONTROL)?;
        let objects = schema::read_control_u64(&control, control_keys::OBJECTS)?.unwrap_or(0);
        let deleted = schema::read_control_u64(&control, control_keys::DELETED)?.unwrap_or(0);
        let bytes = schema::read_control_u64(&control, control_keys::BYTES)?.unwrap_or(0);
        Ok((objects, deleted, bytes))
    }

    // ---------------------------------------------------------------
    // Write-transaction helpers
    // ---------------------------------------------------------------

    fn resolve_in_write(
        &self,
        txn: &WriteTransaction,
        key: &MetaKey<'_>,
    ) -> MetaResult<Option<u64>> {
        match key {
            MetaKey::Id(id) => Ok(Some(*id)),
            MetaKey::Digest(digest) => {
                if !self.algorithms.contains(&digest.algorithm()) {
                    return Ok(None);
                }
                let table = txn.open_table(digest_table(digest.algorithm()))?;
                let result = table.get(digest.as_bytes())?.map(|g| g.value());
                Ok(result)
            }
            MetaKey::Object(obj) => {
                for &algo in self.algorithms.iter().rev() {
                    if let Some(digest) = obj.digests.get(&algo) {
                        let table = txn.open_table(digest_table(algo))?;
                        let found = table.get(digest.as_bytes())?.map(|guard| guard.value());
                        if let Some(id) = found {
                            return Ok(Some(id));
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    fn load_in_write(&self, txn: &WriteTransaction, id: u64) -> MetaResult<Option<Object>> {
        let entry = txn.open_table(ENTRY)?;
        let raw = entry.get(&id)?.map(|guard| guard.value().to_vec());
        match raw {
            None => Ok(None),
            Some(raw) => record::unpack(&raw, &self.algorithms, id).map(Some),
        }
    }
}
