use std::fmt;

use serde::{Deserialize, Serialize};

/// Which validation a flag pair tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Check {
    ContentType,
    Charset,
    Encoding,
    Syntax,
}

impl Check {
    /// All checks, in bit-pair order.
    pub const ALL: [Check; 4] = [
        Check::ContentType,
        Check::Charset,
        Check::Encoding,
        Check::Syntax,
    ];

    /// Bit offset of this check's pair within the flag word.
    const fn shift(&self) -> u16 {
        match self {
            Check::ContentType => 0,
            Check::Charset => 2,
            Check::Encoding => 4,
            Check::Syntax => 6,
        }
    }
}

/// Outcome of one validation check.
///
/// Encoded as two bits, `checked` (high) and `valid` (low): `00` unverified,
/// `10` checked-and-invalid, `01` flagged for recheck, `11` verified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Unverified,
    Invalid,
    Recheck,
    Verified,
}

impl Verdict {
    const fn to_bits(self) -> u16 {
        match self {
            Verdict::Unverified => 0b00,
            Verdict::Recheck => 0b01,
            Verdict::Invalid => 0b10,
            Verdict::Verified => 0b11,
        }
    }

    const fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Verdict::Unverified,
            0b01 => Verdict::Recheck,
            0b10 => Verdict::Invalid,
            _ => Verdict::Verified,
        }
    }
}

/// The validation-flags word of an object record.
///
/// Bits 0-7 hold four checked/valid pairs (content-type, charset, encoding,
/// syntax). Bit 8 marks the record as a cache entry, which changes the
/// meaning of `dtime` from tombstone marker to expiry time.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flags(u16);

impl Flags {
    const CACHE_BIT: u16 = 1 << 8;
    /// Bits with defined meaning; the rest must round-trip as zero.
    const KNOWN: u16 = 0x01ff;

    /// An empty flag word: everything unverified, not a cache record.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Construct from the raw persisted word, masking unknown bits.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::KNOWN)
    }

    /// The raw word as persisted.
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// The verdict recorded for one check.
    pub const fn verdict(&self, check: Check) -> Verdict {
        Verdict::from_bits(self.0 >> check.shift())
    }

    /// Record a verdict for one check.
    pub fn set_verdict(&mut self, check: Check, verdict: Verdict) {
        let shift = check.shift();
        self.0 = (self.0 & !(0b11 << shift)) | (verdict.to_bits() << shift);
    }

    /// Whether the cache bit is set.
    pub const fn is_cache(&self) -> bool {
        self.0 & Self::CACHE_BIT != 0
    }

    /// Set or clear the cache bit.
    pub fn set_cache(&mut self, cache: bool) {
        if cache {
            self.0 |= Self::CACHE_BIT;
        } else {
            self.0 &= !Self::CACHE_BIT;
        }
    }

    /// A copy with the cache bit set or cleared.
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.set_cache(cache);
        self
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#011b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_unverified() {
        let flags = Flags::new();
        for check in Check::ALL {
            assert_eq!(flags.verdict(check), Verdict::Unverified);
        }
        assert!(!flags.is_cache());
    }

    #[test]
    fn verdicts_are_independent() {
        let mut flags = Flags::new();
        flags.set_verdict(Check::Charset, Verdict::Verified);
        flags.set_verdict(Check::Syntax, Verdict::Invalid);

        assert_eq!(flags.verdict(Check::ContentType), Verdict::Unverified);
        assert_eq!(flags.verdict(Check::Charset), Verdict::Verified);
        assert_eq!(flags.verdict(Check::Encoding), Verdict::Unverified);
        assert_eq!(flags.verdict(Check::Syntax), Verdict::Invalid);
    }

    #[test]
    fn overwrite_verdict() {
        let mut flags = Flags::new();
        flags.set_verdict(Check::ContentType, Verdict::Verified);
        flags.set_verdict(Check::ContentType, Verdict::Recheck);
        assert_eq!(flags.verdict(Check::ContentType), Verdict::Recheck);
    }

    #[test]
    fn cache_bit_is_separate_from_verdicts() {
        let mut flags = Flags::new();
        flags.set_cache(true);
        assert!(flags.is_cache());
        for check in Check::ALL {
            assert_eq!(flags.verdict(check), Verdict::Unverified);
        }
        flags.set_cache(false);
        assert!(!flags.is_cache());
    }

    #[test]
    fn bits_roundtrip() {
        let mut flags = Flags::new();
        flags.set_verdict(Check::Encoding, Verdict::Verified);
        flags.set_cache(true);
        let back = Flags::from_bits(flags.bits());
        assert_eq!(flags, back);
    }

    #[test]
    fn unknown_bits_are_masked() {
        let flags = Flags::from_bits(0xffff);
        assert_eq!(flags.bits(), 0x01ff);
    }
}
