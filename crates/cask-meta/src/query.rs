//! Multi-dimensional queries over the secondary indexes.
//!
//! A filter combines discrete sets (ORed within a dimension) and inclusive
//! ranges. The query drives off the supplied dimension with the smallest
//! index cardinality, then applies the remaining predicates as a
//! conjunction over the loaded records: AND between dimensions, OR within.

use std::collections::{BTreeMap, BTreeSet};

use redb::{ReadTransaction, ReadableMultimapTable, ReadableTable, ReadableTableMetadata};
use serde::Serialize;

use cask_types::{Object, Stamp};

use crate::engine::MetaDb;
use crate::error::MetaResult;
use crate::record;
use crate::schema::{self, control_keys, IntDim, StrDim, CONTROL, ENTRY};

/// An inclusive range where either bound may be open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub lo: Option<u64>,
    pub hi: Option<u64>,
}

impl Span {
    /// A range with both bounds.
    pub fn between(lo: u64, hi: u64) -> Self {
        Self {
            lo: Some(lo),
            hi: Some(hi),
        }
    }

    /// `[lo, +inf)`.
    pub fn at_least(lo: u64) -> Self {
        Self {
            lo: Some(lo),
            hi: None,
        }
    }

    /// `(-inf, hi]`.
    pub fn at_most(hi: u64) -> Self {
        Self {
            lo: None,
            hi: Some(hi),
        }
    }

    /// Whether no bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.lo.is_none() && self.hi.is_none()
    }

    fn contains(&self, value: u64) -> bool {
        self.lo.map_or(true, |lo| value >= lo) && self.hi.map_or(true, |hi| value <= hi)
    }
}

/// A multi-dimensional record filter.
///
/// Token dimensions are discrete sets; an empty set means the dimension is
/// not constrained. Numeric and timestamp dimensions are [`Span`]s over the
/// raw value (microseconds for timestamps). A `dtime` constraint only
/// matches records that have a deletion/expiry time at all.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub types: Vec<String>,
    pub charsets: Vec<String>,
    pub encodings: Vec<String>,
    pub languages: Vec<String>,
    pub size: Span,
    pub ctime: Span,
    pub mtime: Span,
    pub ptime: Span,
    pub dtime: Span,
}

impl Filter {
    /// An unconstrained filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the filter constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.charsets.is_empty()
            && self.encodings.is_empty()
            && self.languages.is_empty()
            && self.size.is_unbounded()
            && self.ctime.is_unbounded()
            && self.mtime.is_unbounded()
            && self.ptime.is_unbounded()
            && self.dtime.is_unbounded()
    }

    /// Apply every predicate to a loaded record.
    pub fn matches(&self, obj: &Object) -> bool {
        set_matches(&self.types, obj.media_type.as_deref())
            && set_matches(&self.charsets, obj.charset.as_deref())
            && set_matches(&self.encodings, obj.encoding.as_deref())
            && set_matches(&self.languages, obj.language.as_deref())
            && self.size.contains(obj.size)
            && self.ctime.contains(obj.ctime.as_micros())
            && self.mtime.contains(obj.mtime.as_micros())
            && self.ptime.contains(obj.ptime.as_micros())
            && span_matches_opt(self.dtime, obj.dtime)
    }
}

fn set_matches(set: &[String], value: Option<&str>) -> bool {
    set.is_empty() || value.is_some_and(|v| set.iter().any(|s| s == v))
}

fn span_matches_opt(span: Span, value: Option<Stamp>) -> bool {
    if span.is_unbounded() {
        return true;
    }
    value.is_some_and(|stamp| span.contains(stamp.as_micros()))
}

/// Which index drives the scan.
#[derive(Clone, Copy, Debug)]
enum Drive {
    Str(StrDim),
    Int(IntDim),
}

/// Aggregate store statistics.
#[derive(Clone, Debug, Serialize)]
pub struct Stats {
    pub ctime: Stamp,
    pub mtime: Stamp,
    pub objects: u64,
    pub deleted: u64,
    pub bytes: u64,
    pub types: BTreeMap<String, u64>,
    pub languages: BTreeMap<String, u64>,
    pub charsets: BTreeMap<String, u64>,
    pub encodings: BTreeMap<String, u64>,
}

impl MetaDb {
    /// Query records across dimensions.
    pub fn list(&self, filter: &Filter) -> MetaResult<Vec<Object>> {
        let txn = self.read_txn()?;

        // The driving index is the supplied dimension with the smallest
        // cardinality; with no constraint at all, scan the entry table.
        let mut best: Option<(u64, Drive)> = None;
        let consider = |len: u64, drive: Drive, best: &mut Option<(u64, Drive)>| {
            if best.map_or(true, |(b, _)| len < b) {
                *best = Some((len, drive));
            }
        };

        for (dim, set) in [
            (StrDim::Type, &filter.types),
            (StrDim::Charset, &filter.charsets),
            (StrDim::Encoding, &filter.encodings),
            (StrDim::Language, &filter.languages),
        ] {
            if !set.is_empty() {
                let len = txn.open_multimap_table(dim.table())?.len()?;
                consider(len, Drive::Str(dim), &mut best);
            }
        }
        for (dim, span) in [
            (IntDim::Size, filter.size),
            (IntDim::Ctime, filter.ctime),
            (IntDim::Mtime, filter.mtime),
            (IntDim::Ptime, filter.ptime),
            (IntDim::Dtime, filter.dtime),
        ] {
            if !span.is_unbounded() {
                let mut len = txn.open_multimap_table(dim.table())?.len()?;
                if dim == IntDim::Dtime {
                    // Cache expiries live in their own index.
                    len += txn.open_multimap_table(IntDim::Etime.table())?.len()?;
                }
                consider(len, Drive::Int(dim), &mut best);
            }
        }

        let Some((_, drive)) = best else {
            // Unconstrained (or constrained only by predicates with no
            // index): full entry scan.
            let entry = txn.open_table(ENTRY)?;
            let mut out = Vec::new();
            for item in entry.iter()? {
                let (key, value) = item?;
                let obj = record::unpack(value.value(), self.algorithms(), key.value())?;
                if filter.matches(&obj) {
                    out.push(obj);
                }
            }
            return Ok(out);
        };

        // Collect candidate ids from the driving index, deduplicated.
        let mut ids: BTreeSet<u64> = BTreeSet::new();
        match drive {
            Drive::Str(dim) => {
                let table = txn.open_multimap_table(dim.table())?;
                let values = match dim {
                    StrDim::Type => &filter.types,
                    StrDim::Charset => &filter.charsets,
                    StrDim::Encoding => &filter.encodings,
                    StrDim::Language => &filter.languages,
                };
                for value in values {
                    for item in table.get(value.as_str())? {
                        ids.insert(item?.value());
                    }
                }
            }
            Drive::Int(dim) => {
                let span = match dim {
                    IntDim::Size => filter.size,
                    IntDim::Ctime => filter.ctime,
                    IntDim::Mtime => filter.mtime,
                    IntDim::Ptime => filter.ptime,
                    IntDim::Dtime | IntDim::Etime => filter.dtime,
                };
                collect_range(&txn, dim, span, &mut ids)?;
                if dim == IntDim::Dtime {
                    collect_range(&txn, IntDim::Etime, span, &mut ids)?;
                }
            }
        }

        // Load the candidates and apply the full conjunction.
        let entry = txn.open_table(ENTRY)?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(guard) = entry.get(&id)? {
                let obj = record::unpack(guard.value(), self.algorithms(), id)?;
                if filter.matches(&obj) {
                    out.push(obj);
                }
            }
        }
        Ok(out)
    }

    /// Aggregate statistics: counters plus per-dimension occupancy maps.
    pub fn stats(&self) -> MetaResult<Stats> {
        let txn = self.read_txn()?;

        let (ctime, mtime, objects, deleted, bytes) = {
            let control = txn.open_table(CONTROL)?;
            (
                schema::read_control_u64(&control, control_keys::CTIME)?.unwrap_or(0),
                schema::read_control_u64(&control, control_keys::MTIME)?.unwrap_or(0),
                schema::read_control_u64(&control, control_keys::OBJECTS)?.unwrap_or(0),
                schema::read_control_u64(&control, control_keys::DELETED)?.unwrap_or(0),
                schema::read_control_u64(&control, control_keys::BYTES)?.unwrap_or(0),
            )
        };

        let mut maps: [BTreeMap<String, u64>; 4] = std::array::from_fn(|_| BTreeMap::new());
        for (slot, dim) in maps.iter_mut().zip(StrDim::ALL) {
            let table = txn.open_multimap_table(dim.table())?;
            for item in table.iter()? {
                let (key, values) = item?;
                let mut count = 0u64;
                for value in values {
                    value?;
                    count += 1;
                }
                slot.insert(key.value().to_string(), count);
            }
        }
        let [types, languages, charsets, encodings] = maps;

        Ok(Stats {
            ctime: Stamp::from_micros(ctime),
            mtime: Stamp::from_micros(mtime),
            objects,
            deleted,
            bytes,
            types,
            languages,
            charsets,
            encodings,
        })
    }
}

fn collect_range(
    txn: &ReadTransaction,
    dim: IntDim,
    span: Span,
    ids: &mut BTreeSet<u64>,
) -> MetaResult<()> {
    let table = txn.open_multimap_table(dim.table())?;
    let lo = span.lo.unwrap_or(0);
    let hi = span.hi.unwrap_or(u64::MAX);
    for item in table.range(lo..=hi)? {
        let (_key, values) = item?;
        for value in values {
            ids.insert(value?.value());
        }
    }
    Ok(())
}
