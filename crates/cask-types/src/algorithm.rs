use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A supported digest algorithm.
///
/// The variant order is the canonical order: it fixes the digest layout of
/// the packed entry record and the order of the `algorithms` control key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    Md5,
    #[serde(rename = "sha-1")]
    Sha1,
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

impl Algorithm {
    /// All supported algorithms, in canonical order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha384,
        Algorithm::Sha512,
    ];

    /// The RFC6920 token for this algorithm.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha-1",
            Algorithm::Sha256 => "sha-256",
            Algorithm::Sha384 => "sha-384",
            Algorithm::Sha512 => "sha-512",
        }
    }

    /// Length in bytes of a raw digest under this algorithm.
    pub const fn digest_len(&self) -> usize {
        match self {
            Algorithm::Md5 => 16,
            Algorithm::Sha1 => 20,
            Algorithm::Sha256 => 32,
            Algorithm::Sha384 => 48,
            Algorithm::Sha512 => 64,
        }
    }

    /// Parse a comma-separated algorithm list (the `algorithms` control key),
    /// preserving canonical order and dropping duplicates.
    pub fn parse_set(s: &str) -> Result<Vec<Algorithm>, TypeError> {
        let mut set = Vec::new();
        for token in s.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let algo: Algorithm = token.parse()?;
            if !set.contains(&algo) {
                set.push(algo);
            }
        }
        set.sort();
        Ok(set)
    }

    /// Render a set as the comma-separated control value, canonical order.
    pub fn format_set(set: &[Algorithm]) -> String {
        let mut sorted: Vec<Algorithm> = set.to_vec();
        sorted.sort();
        sorted
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(Algorithm::Md5),
            "sha-1" => Ok(Algorithm::Sha1),
            "sha-256" => Ok(Algorithm::Sha256),
            "sha-384" => Ok(Algorithm::Sha384),
            "sha-512" => Ok(Algorithm::Sha512),
            other => Err(TypeError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_tokens() {
        for algo in Algorithm::ALL {
            let parsed: Algorithm = algo.as_str().parse().unwrap();
            assert_eq!(algo, parsed);
        }
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(Algorithm::Md5.digest_len(), 16);
        assert_eq!(Algorithm::Sha1.digest_len(), 20);
        assert_eq!(Algorithm::Sha256.digest_len(), 32);
        assert_eq!(Algorithm::Sha384.digest_len(), 48);
        assert_eq!(Algorithm::Sha512.digest_len(), 64);
    }

    #[test]
    fn unknown_token_rejected() {
        let err = "sha-224".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, TypeError::UnknownAlgorithm(_)));
    }

    #[test]
    fn parse_set_canonicalizes_order() {
        let set = Algorithm::parse_set("sha-512,md5,sha-256").unwrap();
        assert_eq!(
            set,
            vec![Algorithm::Md5, Algorithm::Sha256, Algorithm::Sha512]
        );
    }

    #[test]
    fn parse_set_drops_duplicates() {
        let set = Algorithm::parse_set("md5,md5,sha-1").unwrap();
        assert_eq!(set, vec![Algorithm::Md5, Algorithm::Sha1]);
    }

    #[test]
    fn format_set_is_canonical() {
        let s = Algorithm::format_set(&[Algorithm::Sha512, Algorithm::Md5]);
        assert_eq!(s, "md5,sha-512");
    }
}
