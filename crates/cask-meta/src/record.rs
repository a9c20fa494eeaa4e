//! The packed entry record.
//!
//! One entry-table value is a fixed-order concatenation:
//!
//! ```text
//! [digest bytes, one run per enabled algorithm, canonical order]
//! [size: u64 LE]
//! [ctime, mtime, ptime, dtime: u64 LE microseconds each; 0 = none]
//! [flags: u16 LE]
//! [type NUL] [language NUL] [charset NUL] [encoding NUL]
//! ```
//!
//! The digest runs make the record self-contained: an entry can be inflated
//! without consulting the digest tables. Zero timestamps and empty strings
//! decode to "none". A byte length that cannot match the enabled algorithm
//! set decodes to a corrupt-record error.

use std::collections::BTreeMap;

use cask_types::{Algorithm, DigestUri, Flags, Object, Stamp};

use crate::error::{MetaError, MetaResult};

/// Fixed-width tail: size + four timestamps + flags.
const SCALAR_LEN: usize = 8 + 4 * 8 + 2;

fn digests_len(algorithms: &[Algorithm]) -> usize {
    algorithms.iter().map(|a| a.digest_len()).sum()
}

/// Serialize an object into its packed form.
///
/// The object must carry a digest for every enabled algorithm.
pub fn pack(obj: &Object, algorithms: &[Algorithm]) -> MetaResult<Vec<u8>> {
    let strings = [
        obj.media_type.as_deref(),
        obj.language.as_deref(),
        obj.charset.as_deref(),
        obj.encoding.as_deref(),
    ];
    let string_len: usize = strings.iter().map(|s| s.map_or(0, str::len) + 1).sum();

    let mut buf = Vec::with_capacity(digests_len(algorithms) + SCALAR_LEN + string_len);

    for &algo in algorithms {
        let digest = obj
            .digests
            .get(&algo)
            .ok_or(MetaError::MissingDigest(algo))?;
        buf.extend_from_slice(digest.as_bytes());
    }

    buf.extend_from_slice(&obj.size.to_le_bytes());
    buf.extend_from_slice(&obj.ctime.as_micros().to_le_bytes());
    buf.extend_from_slice(&obj.mtime.as_micros().to_le_bytes());
    buf.extend_from_slice(&obj.ptime.as_micros().to_le_bytes());
    buf.extend_from_slice(
        &obj.dtime
            .map_or(0u64, |stamp| stamp.as_micros())
            .to_le_bytes(),
    );
    buf.extend_from_slice(&obj.flags.bits().to_le_bytes());

    for s in strings {
        if let Some(s) = s {
            buf.extend_from_slice(s.as_bytes());
        }
        buf.push(0);
    }

    Ok(buf)
}

/// Inflate an object from its packed form.
pub fn unpack(raw: &[u8], algorithms: &[Algorithm], id: u64) -> MetaResult<Object> {
    let corrupt = |reason: &str| MetaError::CorruptRecord {
        id,
        reason: reason.to_string(),
    };

    let fixed_len = digests_len(algorithms) + SCALAR_LEN;
    if raw.len() < fixed_len {
        return Err(corrupt("record shorter than its fixed-width prefix"));
    }

    let mut offset = 0;
    let mut digests = BTreeMap::new();
    for &algo in algorithms {
        let len = algo.digest_len();
        let bytes = raw[offset..offset + len].to_vec();
        digests.insert(algo, DigestUri::new(algo, bytes)?);
        offset += len;
    }

    let read_u64 = |offset: &mut usize| {
        let mut word = [0u8; 8];
        word.copy_from_slice(&raw[*offset..*offset + 8]);
        *offset += 8;
        u64::from_le_bytes(word)
    };

    let size = read_u64(&mut offset);
    let ctime = read_u64(&mut offset);
    let mtime = read_u64(&mut offset);
    let ptime = read_u64(&mut offset);
    let dtime = read_u64(&mut offset);

    let flags_bits = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
    offset += 2;

    let mut strings: [Option<String>; 4] = [None, None, None, None];
    let mut rest = &raw[offset..];
    for slot in &mut strings {
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupt("truncated string section"))?;
        if nul > 0 {
            let s = std::str::from_utf8(&rest[..nul])
                .map_err(|_| corrupt("string section is not UTF-8"))?;
            *slot = Some(s.to_string());
        }
        rest = &rest[nul + 1..];
    }
    if !rest.is_empty() {
        return Err(corrupt("trailing bytes after string section"));
    }

    let [media_type, language, charset, encoding] = strings;

    Ok(Object {
        digests,
        size,
        ctime: Stamp::from_micros(ctime),
        mtime: Stamp::from_micros(mtime),
        ptime: Stamp::from_micros(ptime),
        dtime: (dtime != 0).then(|| Stamp::from_micros(dtime)),
        media_type,
        language,
        charset,
        encoding,
        flags: Flags::from_bits(flags_bits),
        fresh: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_types::Check;
    use cask_types::Verdict;

    fn digest(algorithm: Algorithm, fill: u8) -> DigestUri {
        DigestUri::new(algorithm, vec![fill; algorithm.digest_len()]).unwrap()
    }

    fn full_object(algorithms: &[Algorithm]) -> Object {
        let digests = algorithms
            .iter()
            .map(|&a| (a, digest(a, a.digest_len() as u8)))
            .collect();
        let mut obj = Object::from_scan(digests, 1234);
        obj.ctime = Stamp::from_unix_secs(1_700_000_000);
        obj.mtime = Stamp::from_unix_secs(1_700_000_100);
        obj.ptime = Stamp::from_unix_secs(1_700_000_200);
        obj.media_type = Some("text/plain".into());
        obj.language = Some("en".into());
        obj
    }

    #[test]
    fn roundtrip_full_set() {
        let obj = full_object(&Algorithm::ALL);
        let raw = pack(&obj, &Algorithm::ALL).unwrap();
        let back = unpack(&raw, &Algorithm::ALL, 1).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn roundtrip_subset_and_options() {
        let algos = [Algorithm::Sha1, Algorithm::Sha256];
        let mut obj = full_object(&algos);
        obj.dtime = Some(Stamp::from_unix_secs(1_700_000_300));
        obj.charset = Some("utf-8".into());
        obj.encoding = Some("gzip".into());
        obj.flags.set_verdict(Check::ContentType, Verdict::Verified);
        obj.flags.set_cache(true);

        let raw = pack(&obj, &algos).unwrap();
        let back = unpack(&raw, &algos, 7).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn none_fields_decode_as_none() {
        let algos = [Algorithm::Sha256];
        let obj = full_object(&algos);
        let raw = pack(&obj, &algos).unwrap();
        let back = unpack(&raw, &algos, 1).unwrap();
        assert_eq!(back.dtime, None);
        assert_eq!(back.charset, None);
        assert_eq!(back.encoding, None);
    }

    #[test]
    fn missing_digest_rejected() {
        let obj = full_object(&[Algorithm::Sha256]);
        let err = pack(&obj, &Algorithm::ALL).unwrap_err();
        assert!(matches!(err, MetaError::MissingDigest(_)));
    }

    #[test]
    fn short_record_is_corrupt() {
        let err = unpack(&[0u8; 10], &[Algorithm::Sha256], 3).unwrap_err();
        assert!(matches!(err, MetaError::CorruptRecord { id: 3, .. }));
    }

    #[test]
    fn wrong_algorithm_set_is_corrupt() {
        let algos = [Algorithm::Sha256];
        let obj = full_object(&algos);
        let raw = pack(&obj, &algos).unwrap();
        // Reading with a larger algorithm set shifts every offset.
        assert!(unpack(&raw, &Algorithm::ALL, 1).is_err());
    }

    #[test]
    fn truncated_strings_are_corrupt() {
        let algos = [Algorithm::Sha256];
        let obj = full_object(&algos);
        let mut raw = pack(&obj, &algos).unwrap();
        raw.pop();
        let err = unpack(&raw, &algos, 1).unwrap_err();
        assert!(matches!(err, MetaError::CorruptRecord { .. }));
    }

    #[test]
    fn trailing_garbage_is_corrupt() {
        let algos = [Algorithm::Sha256];
        let obj = full_object(&algos);
        let mut raw = pack(&obj, &algos).unwrap();
        raw.push(0);
        let err = unpack(&raw, &algos, 1).unwrap_err();
        assert!(matches!(err, MetaError::CorruptRecord { .. }));
    }
}
