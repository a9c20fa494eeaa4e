use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::error::TypeError;

/// A digest identifier: an algorithm paired with its raw digest bytes.
///
/// The wire form is an RFC6920 named-information URI,
/// `ni:///<algorithm>;<base64url-without-padding>`. Identical content always
/// produces the same identifier under a given algorithm.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DigestUri {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl DigestUri {
    /// Construct from an algorithm and raw digest bytes.
    ///
    /// The byte length must match the algorithm's digest size.
    pub fn new(algorithm: Algorithm, bytes: Vec<u8>) -> Result<Self, TypeError> {
        if bytes.len() != algorithm.digest_len() {
            return Err(TypeError::BadDigestLength {
                algorithm: algorithm.as_str(),
                expected: algorithm.digest_len(),
                actual: bytes.len(),
            });
        }
        Ok(Self { algorithm, bytes })
    }

    /// The algorithm component.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex form of the raw digest (for logs and display).
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Short hex form (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.bytes[..4])
    }

    /// The `ni:` URI form.
    pub fn to_uri(&self) -> String {
        format!(
            "ni:///{};{}",
            self.algorithm.as_str(),
            URL_SAFE_NO_PAD.encode(&self.bytes)
        )
    }

    /// Parse a `ni:///<algo>;<b64>` URI.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let rest = s
            .strip_prefix("ni:///")
            .ok_or_else(|| TypeError::MalformedUri(s.to_string()))?;
        let (algo, payload) = rest
            .split_once(';')
            .ok_or_else(|| TypeError::MalformedUri(s.to_string()))?;
        let algorithm: Algorithm = algo.parse()?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TypeError::MalformedUri(s.to_string()))?;
        Self::new(algorithm, bytes)
    }
}

impl fmt::Display for DigestUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl fmt::Debug for DigestUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DigestUri({}:{})",
            self.algorithm.as_str(),
            self.short_hex()
        )
    }
}

impl FromStr for DigestUri {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(algorithm: Algorithm, fill: u8) -> DigestUri {
        DigestUri::new(algorithm, vec![fill; algorithm.digest_len()]).unwrap()
    }

    #[test]
    fn uri_roundtrip() {
        for algo in Algorithm::ALL {
            let d = sample(algo, 0xab);
            let parsed = DigestUri::parse(&d.to_uri()).unwrap();
            assert_eq!(d, parsed);
        }
    }

    #[test]
    fn wrong_length_rejected() {
        let err = DigestUri::new(Algorithm::Sha256, vec![0u8; 20]).unwrap_err();
        assert!(matches!(err, TypeError::BadDigestLength { .. }));
    }

    #[test]
    fn rfc6920_hello_world_vector() {
        // The sha-256 example URI from RFC 6920.
        let uri = "ni:///sha-256;f4OxZX_x_FO5LcGBSKHWXfwtSx-j1ncoSt3SABJtkGk";
        let d = DigestUri::parse(uri).unwrap();
        assert_eq!(d.algorithm(), Algorithm::Sha256);
        assert_eq!(d.as_bytes().len(), 32);
        assert_eq!(d.to_uri(), uri);
    }

    #[test]
    fn missing_scheme_rejected() {
        assert!(DigestUri::parse("sha-256;AAAA").is_err());
        assert!(DigestUri::parse("ni:///sha-256").is_err());
    }

    #[test]
    fn bad_payload_rejected() {
        assert!(DigestUri::parse("ni:///sha-256;!!!").is_err());
    }

    #[test]
    fn display_matches_uri() {
        let d = sample(Algorithm::Md5, 1);
        assert_eq!(format!("{d}"), d.to_uri());
    }

    #[test]
    fn serde_roundtrip() {
        let d = sample(Algorithm::Sha384, 0x3c);
        let json = serde_json::to_string(&d).unwrap();
        let parsed: DigestUri = serde_json::from_str(&json).unwrap();
        assert_eq!(d, parsed);
    }
}
