use std::path::PathBuf;
use std::time::Duration;

use cask_types::Algorithm;

use crate::error::{StoreError, StoreResult};

/// Store configuration.
///
/// `dir` is the only required field. `algorithms` and `primary` matter at
/// creation and are fixed for the life of a store; supplying them for an
/// existing store asserts they match.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory: holds `store/`, `tmp/`, and the metadata database.
    pub dir: PathBuf,
    /// Enabled digest algorithms (default: all supported).
    pub algorithms: Option<Vec<Algorithm>>,
    /// The primary algorithm (default: sha-256). Must be in `algorithms`.
    pub primary: Option<Algorithm>,
    /// Memory budget for the metadata engine, in bytes. Parsed from the
    /// `mapsize` option; see [`parse_size`].
    pub mapsize: Option<u64>,
    /// Mode mask for created files and directories.
    pub umask: Option<u32>,
    /// Cache-entry lifetime (default: one day).
    pub expiry: Duration,
}

impl Config {
    /// A configuration with defaults for everything but the directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            algorithms: None,
            primary: None,
            mapsize: None,
            umask: None,
            expiry: Duration::from_secs(86_400),
        }
    }

    /// Set the enabled algorithm set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = Some(algorithms);
        self
    }

    /// Set the primary algorithm.
    pub fn primary(mut self, primary: Algorithm) -> Self {
        self.primary = Some(primary);
        self
    }

    /// Set the engine memory budget from a size string (e.g. `"64M"`).
    pub fn mapsize(mut self, size: &str) -> StoreResult<Self> {
        self.mapsize = Some(parse_size(size)?);
        Ok(self)
    }

    /// Set the mode mask.
    pub fn umask(mut self, umask: u32) -> Self {
        self.umask = Some(umask);
        self
    }
}

/// Parse a decimal size with an optional unit suffix.
///
/// Lowercase suffixes are decimal (`k` = 10^3 .. `e` = 10^18), uppercase
/// binary (`K` = 2^10 .. `E` = 2^60).
pub fn parse_size(input: &str) -> StoreResult<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(StoreError::Config("empty size".to_string()));
    }

    let (digits, factor) = match input.find(|c: char| !c.is_ascii_digit()) {
        None => (input, 1u64),
        Some(split) => {
            let (digits, suffix) = input.split_at(split);
            let factor = match suffix {
                "k" => 1_000u64,
                "m" => 1_000_000,
                "g" => 1_000_000_000,
                "t" => 1_000_000_000_000,
                "p" => 1_000_000_000_000_000,
                "e" => 1_000_000_000_000_000_000,
                "K" => 1 << 10,
                "M" => 1 << 20,
                "G" => 1 << 30,
                "T" => 1 << 40,
                "P" => 1 << 50,
                "E" => 1 << 60,
                other => {
                    return Err(StoreError::Config(format!(
                        "unrecognized size suffix {other:?}"
                    )));
                }
            };
            (digits, factor)
        }
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| StoreError::Config(format!("bad size {input:?}")))?;
    value
        .checked_mul(factor)
        .ok_or_else(|| StoreError::Config(format!("size {input:?} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_number() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
    }

    #[test]
    fn lowercase_is_decimal() {
        assert_eq!(parse_size("2k").unwrap(), 2_000);
        assert_eq!(parse_size("3m").unwrap(), 3_000_000);
        assert_eq!(parse_size("1g").unwrap(), 1_000_000_000);
    }

    #[test]
    fn uppercase_is_binary() {
        assert_eq!(parse_size("2K").unwrap(), 2048);
        assert_eq!(parse_size("1M").unwrap(), 1 << 20);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("12q").is_err());
        assert!(parse_size("k12").is_err());
        assert!(parse_size("1.5G").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_size("99999999E").is_err());
    }

    #[test]
    fn config_builder() {
        let config = Config::new("/tmp/store")
            .primary(Algorithm::Sha512)
            .mapsize("64M")
            .unwrap()
            .umask(0o002);
        assert_eq!(config.primary, Some(Algorithm::Sha512));
        assert_eq!(config.mapsize, Some(64 << 20));
        assert_eq!(config.umask, Some(0o002));
    }
}
