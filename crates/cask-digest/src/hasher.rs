use std::collections::BTreeMap;

use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};

use cask_types::{Algorithm, DigestUri};

/// Runs every enabled digest algorithm over one stream of bytes.
///
/// The store computes all of its digests in a single pass; this type holds
/// one running state per enabled algorithm and yields the full digest set at
/// the end.
pub struct MultiHasher {
    states: Vec<(Algorithm, Box<dyn DynDigest>)>,
}

impl MultiHasher {
    /// Create hasher states for the given algorithms.
    pub fn new(algorithms: &[Algorithm]) -> Self {
        let states = algorithms
            .iter()
            .map(|&algo| {
                let state: Box<dyn DynDigest> = match algo {
                    Algorithm::Md5 => Box::new(Md5::new()),
                    Algorithm::Sha1 => Box::new(Sha1::new()),
                    Algorithm::Sha256 => Box::new(Sha256::new()),
                    Algorithm::Sha384 => Box::new(Sha384::new()),
                    Algorithm::Sha512 => Box::new(Sha512::new()),
                };
                (algo, state)
            })
            .collect();
        Self { states }
    }

    /// Feed a chunk of content into every algorithm.
    pub fn update(&mut self, data: &[u8]) {
        for (_, state) in &mut self.states {
            state.update(data);
        }
    }

    /// Finalize every algorithm into its digest identifier.
    pub fn finish(mut self) -> BTreeMap<Algorithm, DigestUri> {
        self.states
            .drain(..)
            .map(|(algo, mut state)| {
                let raw = state.finalize_reset().to_vec();
                let uri = DigestUri::new(algo, raw)
                    .expect("digest output length matches its algorithm");
                (algo, uri)
            })
            .collect()
    }
}
