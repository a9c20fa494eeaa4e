//! Table layout, schema versioning, and index maintenance.
//!
//! Schema v1 keys the `entry` table by a monotonically assigned integer id
//! and resolves digests through one table per algorithm. The legacy v0
//! layout keyed `entry` directly by the raw primary digest; it is detected
//! at open time and upgraded in place inside one write transaction.

use redb::{
    MultimapTableDefinition, ReadableTable, ReadableTableMetadata, Table, TableDefinition,
    WriteTransaction,
};
use tracing::info;

use cask_types::{Algorithm, Object, Stamp};

use crate::error::{MetaError, MetaResult};
use crate::record;

/// Control scalars: store identity, counters, configuration.
pub(crate) const CONTROL: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("control");

/// Entry records keyed by integer id (v1).
pub(crate) const ENTRY: TableDefinition<'static, u64, &'static [u8]> =
    TableDefinition::new("entry");

/// Legacy v0 entry table: keyed by raw primary digest.
pub(crate) const ENTRY_V0: TableDefinition<'static, &'static [u8], &'static [u8]> =
    TableDefinition::new("entry");

/// Control table keys.
pub(crate) mod control_keys {
    pub const VERSION: &str = "version";
    pub const CTIME: &str = "ctime";
    pub const MTIME: &str = "mtime";
    pub const EXPIRY: &str = "expiry";
    pub const OBJECTS: &str = "objects";
    pub const DELETED: &str = "deleted";
    pub const BYTES: &str = "bytes";
    pub const ALGORITHMS: &str = "algorithms";
    pub const PRIMARY: &str = "primary";
}

/// The digest-resolution table for one algorithm: raw digest -> entry id.
pub(crate) fn digest_table(algo: Algorithm) -> TableDefinition<'static, &'static [u8], u64> {
    TableDefinition::new(digest_table_name(algo))
}

const fn digest_table_name(algo: Algorithm) -> &'static str {
    match algo {
        Algorithm::Md5 => "digest:md5",
        Algorithm::Sha1 => "digest:sha-1",
        Algorithm::Sha256 => "digest:sha-256",
        Algorithm::Sha384 => "digest:sha-384",
        Algorithm::Sha512 => "digest:sha-512",
    }
}

/// Integer-keyed secondary indexes. `Dtime` holds tombstone deletion times;
/// `Etime` holds cache expiry times. A record appears in exactly one of the
/// two when its `dtime` is set, selected by the cache bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IntDim {
    Size,
    Ctime,
    Mtime,
    Ptime,
    Dtime,
    Etime,
}

impl IntDim {
    pub(crate) const ALL: [IntDim; 6] = [
        IntDim::Size,
        IntDim::Ctime,
        IntDim::Mtime,
        IntDim::Ptime,
        IntDim::Dtime,
        IntDim::Etime,
    ];

    pub(crate) fn table(self) -> MultimapTableDefinition<'static, u64, u64> {
        MultimapTableDefinition::new(match self {
            IntDim::Size => "idx:size",
            IntDim::Ctime => "idx:ctime",
            IntDim::Mtime => "idx:mtime",
            IntDim::Ptime => "idx:ptime",
            IntDim::Dtime => "idx:dtime",
            IntDim::Etime => "idx:etime",
        })
    }

    /// The index key an object contributes to this dimension, if any.
    pub(crate) fn key(self, obj: &Object) -> Option<u64> {
        match self {
            IntDim::Size => Some(obj.size),
            IntDim::Ctime => Some(obj.ctime.as_micros()),
            IntDim::Mtime => Some(obj.mtime.as_micros()),
            IntDim::Ptime => Some(obj.ptime.as_micros()),
            IntDim::Dtime => obj
                .dtime
                .filter(|_| !obj.flags.is_cache())
                .map(|s| s.as_micros()),
            IntDim::Etime => obj
                .dtime
                .filter(|_| obj.flags.is_cache())
                .map(|s| s.as_micros()),
        }
    }
}

/// Token-keyed secondary indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StrDim {
    Type,
    Language,
    Charset,
    Encoding,
}

impl StrDim {
    pub(crate) const ALL: [StrDim; 4] = [
        StrDim::Type,
        StrDim::Language,
        StrDim::Charset,
        StrDim::Encoding,
    ];

    pub(crate) fn table(self) -> MultimapTableDefinition<'static, &'static str, u64> {
        MultimapTableDefinition::new(match self {
            StrDim::Type => "idx:type",
            StrDim::Language => "idx:language",
            StrDim::Charset => "idx:charset",
            StrDim::Encoding => "idx:encoding",
        })
    }

    pub(crate) fn key(self, obj: &Object) -> Option<&str> {
        match self {
            StrDim::Type => obj.media_type.as_deref(),
            StrDim::Language => obj.language.as_deref(),
            StrDim::Charset => obj.charset.as_deref(),
            StrDim::Encoding => obj.encoding.as_deref(),
        }
    }
}

/// Move an entry's secondary-index rows from its old shape to its new one.
///
/// `old = None` is a creation, `new = None` a purge. Unchanged keys are left
/// alone; nil keys are skipped.
pub(crate) fn update_indexes(
    txn: &WriteTransaction,
    id: u64,
    old: Option<&Object>,
    new: Option<&Object>,
) -> MetaResult<()> {
    for dim in IntDim::ALL {
        let old_key = old.and_then(|o| dim.key(o));
        let new_key = new.and_then(|o| dim.key(o));
        if old_key != new_key {
            let mut table = txn.open_multimap_table(dim.table())?;
            if let Some(key) = old_key {
                table.remove(&key, &id)?;
            }
            if let Some(key) = new_key {
                table.insert(&key, &id)?;
            }
        }
    }
    for dim in StrDim::ALL {
        let old_key = old.and_then(|o| dim.key(o));
        let new_key = new.and_then(|o| dim.key(o));
        if old_key != new_key {
            let mut table = txn.open_multimap_table(dim.table())?;
            if let Some(key) = old_key {
                table.remove(key, &id)?;
            }
            if let Some(key) = new_key {
                table.insert(key, &id)?;
            }
        }
    }
    Ok(())
}

/// Whether a record counts toward the `deleted` counter: a tombstone, or a
/// cache entry whose expiry has passed.
pub(crate) fn counted_deleted(obj: &Object, now: Stamp) -> bool {
    match obj.dtime {
        None => false,
        Some(dtime) => !obj.flags.is_cache() || dtime <= now,
    }
}

/// Read a little-endian u64 control value.
pub(crate) fn read_control_u64(
    control: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &'static str,
) -> MetaResult<Option<u64>> {
    match control.get(key)? {
        None => Ok(None),
        Some(guard) => {
            let raw: [u8; 8] = guard
                .value()
                .try_into()
                .map_err(|_| MetaError::CorruptControl { key })?;
            Ok(Some(u64::from_le_bytes(raw)))
        }
    }
}

/// Write a little-endian u64 control value.
pub(crate) fn write_control_u64(
    control: &mut Table<'_, &'static str, &'static [u8]>,
    key: &'static str,
    value: u64,
) -> MetaResult<()> {
    control.insert(key, value.to_le_bytes().as_slice())?;
    Ok(())
}

/// Apply a signed delta to a u64 control counter, saturating at zero.
pub(crate) fn bump_control_u64(
    control: &mut Table<'_, &'static str, &'static [u8]>,
    key: &'static str,
    delta: i64,
) -> MetaResult<()> {
    let current = read_control_u64(control, key)?.unwrap_or(0);
    let next = if delta < 0 {
        current.saturating_sub(delta.unsigned_abs())
    } else {
        current.saturating_add(delta as u64)
    };
    write_control_u64(control, key, next)
}

/// Read a UTF-8 control value.
pub(crate) fn read_control_str(
    control: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &'static str,
) -> MetaResult<Option<String>> {
    match control.get(key)? {
        None => Ok(None),
        Some(guard) => {
            let s = std::str::from_utf8(guard.value())
                .map_err(|_| MetaError::CorruptControl { key })?;
            Ok(Some(s.to_string()))
        }
    }
}

/// What the control table says about an opened database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Detected {
    /// Empty control table: a brand-new store.
    Fresh,
    /// Populated control table without a `version` key.
    V0,
    /// `version` is `"1"`.
    V1,
}

/// Inspect the control table and classify the schema.
pub(crate) fn detect(txn: &WriteTransaction) -> MetaResult<Detected> {
    let control = txn.open_table(CONTROL)?;
    if control.is_empty()? {
        return Ok(Detected::Fresh);
    }
    let version = control.get(control_keys::VERSION)?.map(|guard| guard.value().to_vec());
    match version {
        None => Ok(Detected::V0),
        Some(v) if v == b"1".as_slice() => Ok(Detected::V1),
        Some(v) => Err(MetaError::UnknownSchemaVersion(
            String::from_utf8_lossy(&v).into_owned(),
        )),
    }
}

/// Create every v1 table so later read transactions can open them freely.
pub(crate) fn ensure_tables(txn: &WriteTransaction, algorithms: &[Algorithm]) -> MetaResult<()> {
    txn.open_table(ENTRY)?;
    for &algo in algorithms {
        txn.open_table(digest_table(algo))?;
    }
    for dim in IntDim::ALL {
        txn.open_multimap_table(dim.table())?;
    }
    for dim in StrDim::ALL {
        txn.open_multimap_table(dim.table())?;
    }
    Ok(())
}

/// Initialize the control table of a brand-new v1 store.
pub(crate) fn init_control(
    txn: &WriteTransaction,
    algorithms: &[Algorithm],
    primary: Algorithm,
    expiry_micros: u64,
    now: Stamp,
) -> MetaResult<()> {
    use control_keys::*;

    let mut control = txn.open_table(CONTROL)?;
    control.insert(VERSION, b"1".as_slice())?;
    write_control_u64(&mut control, CTIME, now.as_micros())?;
    write_control_u64(&mut control, MTIME, now.as_micros())?;
    write_control_u64(&mut control, EXPIRY, expiry_micros)?;
    write_control_u64(&mut control, OBJECTS, 0)?;
    write_control_u64(&mut control, DELETED, 0)?;
    write_control_u64(&mut control, BYTES, 0)?;
    control.insert(ALGORITHMS, Algorithm::format_set(algorithms).as_bytes())?;
    control.insert(PRIMARY, primary.as_str().as_bytes())?;
    Ok(())
}

/// Upgrade a v0 store to v1 in place.
///
/// v0 keyed `entry` by the raw primary digest and resolved nothing else;
/// the packed record layout is the same. Entry ids are assigned in digest
/// order; digest tables, secondary indexes, and counters are rebuilt from
/// the records themselves.
pub(crate) fn upgrade_v0(
    txn: &WriteTransaction,
    algorithms: &[Algorithm],
    now: Stamp,
) -> MetaResult<()> {
    use control_keys::*;

    let legacy: Vec<Vec<u8>> = {
        let table = txn.open_table(ENTRY_V0)?;
        let mut rows = Vec::new();
        for item in table.iter()? {
            let (_digest, packed) = item?;
            rows.push(packed.value().to_vec());
        }
        rows
    };
    txn.delete_table(ENTRY_V0)?;
    ensure_tables(txn, algorithms)?;

    let mut objects = 0u64;
    let mut deleted = 0u64;
    let mut bytes = 0u64;

    for (i, packed) in legacy.iter().enumerate() {
        let id = i as u64 + 1;
        let obj = record::unpack(packed, algorithms, id)?;
        {
            let mut entry = txn.open_table(ENTRY)?;
            entry.insert(id, packed.as_slice())?;
        }
        for (&algo, digest) in &obj.digests {
            let mut table = txn.open_table(digest_table(algo))?;
            table.insert(digest.as_bytes(), &id)?;
        }
        update_indexes(txn, id, None, Some(&obj))?;

        objects += 1;
        if counted_deleted(&obj, now) {
            deleted += 1;
        } else {
            bytes += obj.size;
        }
    }

    let mut control = txn.open_table(CONTROL)?;
    control.insert(VERSION, b"1".as_slice())?;
    write_control_u64(&mut control, OBJECTS, objects)?;
    write_control_u64(&mut control, DELETED, deleted)?;
    write_control_u64(&mut control, BYTES, bytes)?;
    write_control_u64(&mut control, MTIME, now.as_micros())?;
    if read_control_u64(&control, EXPIRY)?.is_none() {
        write_control_u64(&mut control, EXPIRY, 86_400 * 1_000_000)?;
    }

    info!(entries = objects, "upgraded metadata schema v0 -> v1");
    Ok(())
}
