//! One-pass content scanning for the cask blob store.
//!
//! A scan streams a byte source through every enabled digest algorithm at
//! once, retains a bounded sample for media-type detection, tallies the
//! size, and can tee the bytes into a sink (the temp blob during `add`).

pub mod error;
pub mod hasher;
pub mod scan;
pub mod sniff;

pub use error::{ScanError, ScanResult};
pub use hasher::MultiHasher;
pub use scan::{scan, ScanOutcome, Source, SAMPLE_SIZE};
pub use sniff::{is_refinement, MagicSniffer, MediaSniffer};
