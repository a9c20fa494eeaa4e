use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use cask_types::{Algorithm, DigestUri, Stamp};

use crate::error::ScanResult;
use crate::hasher::MultiHasher;

/// Bytes of content retained for media-type detection. 8 KiB is enough to
/// see past the zip local-file headers of OOXML containers.
pub const SAMPLE_SIZE: usize = 8192;

const CHUNK_SIZE: usize = 64 * 1024;

/// A byte source accepted by the scanner.
pub enum Source<'a> {
    /// An in-memory byte string.
    Bytes(&'a [u8]),
    /// A file on disk; its mtime is captured for the record.
    Path(&'a Path),
    /// An arbitrary reader, consumed to EOF.
    Reader(Box<dyn Read + 'a>),
}

impl<'a> From<&'a [u8]> for Source<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Source::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Source<'a> {
    fn from(s: &'a str) -> Self {
        Source::Bytes(s.as_bytes())
    }
}

impl<'a> From<&'a Path> for Source<'a> {
    fn from(path: &'a Path) -> Self {
        Source::Path(path)
    }
}

impl<'a> Source<'a> {
    /// The file name associated with the source, when it has one.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Source::Path(path) => path.file_name().and_then(|n| n.to_str()),
            _ => None,
        }
    }
}

/// Everything a single pass over a source produces.
#[derive(Clone, Debug)]
pub struct ScanOutcome {
    /// One digest per enabled algorithm.
    pub digests: BTreeMap<Algorithm, DigestUri>,
    /// Total bytes read.
    pub size: u64,
    /// The first [`SAMPLE_SIZE`] bytes, for media-type detection.
    pub sample: Vec<u8>,
    /// The source file's mtime, when the source was a path.
    pub source_mtime: Option<Stamp>,
}

/// Running state of one scan pass.
struct ScanState<'s> {
    hasher: MultiHasher,
    sample: Vec<u8>,
    size: u64,
    sink: Option<&'s mut dyn Write>,
}

impl<'s> ScanState<'s> {
    fn new(algorithms: &[Algorithm], sink: Option<&'s mut dyn Write>) -> Self {
        Self {
            hasher: MultiHasher::new(algorithms),
            sample: Vec::with_capacity(SAMPLE_SIZE),
            size: 0,
            sink,
        }
    }

    fn consume(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.hasher.update(chunk);
        if self.sample.len() < SAMPLE_SIZE {
            let take = (SAMPLE_SIZE - self.sample.len()).min(chunk.len());
            self.sample.extend_from_slice(&chunk[..take]);
        }
        self.size += chunk.len() as u64;
        if let Some(w) = self.sink.as_mut() {
            w.write_all(chunk)?;
        }
        Ok(())
    }

    fn drain(&mut self, mut reader: impl Read) -> io::Result<()> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.consume(&buf[..n])?;
        }
        Ok(())
    }

    fn finish(mut self, source_mtime: Option<Stamp>) -> io::Result<ScanOutcome> {
        if let Some(w) = self.sink.as_mut() {
            w.flush()?;
        }
        Ok(ScanOutcome {
            digests: self.hasher.finish(),
            size: self.size,
            sample: self.sample,
            source_mtime,
        })
    }
}

/// Stream a source through every enabled digest algorithm in one pass.
///
/// Bytes are optionally teed into `sink` (the temp blob during `add`); the
/// first [`SAMPLE_SIZE`] bytes are retained for media-type detection and the
/// total size is tallied.
pub fn scan(
    source: Source<'_>,
    algorithms: &[Algorithm],
    sink: Option<&mut dyn Write>,
) -> ScanResult<ScanOutcome> {
    let mut state = ScanState::new(algorithms, sink);
    let mut source_mtime = None;

    match source {
        Source::Bytes(bytes) => {
            for chunk in bytes.chunks(CHUNK_SIZE) {
                state.consume(chunk)?;
            }
        }
        Source::Path(path) => {
            let file = File::open(path)?;
            source_mtime = file.metadata()?.modified().ok().map(Stamp::from);
            state.drain(file)?;
        }
        Source::Reader(reader) => {
            state.drain(reader)?;
        }
    }

    Ok(state.finish(source_mtime)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bytes_and_reader_agree() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let a = scan(Source::Bytes(data), &Algorithm::ALL, None).unwrap();
        let b = scan(
            Source::Reader(Box::new(Cursor::new(data.to_vec()))),
            &Algorithm::ALL,
            None,
        )
        .unwrap();
        assert_eq!(a.digests, b.digests);
        assert_eq!(a.size, b.size);
        assert_eq!(a.sample, b.sample);
    }

    #[test]
    fn file_source_matches_bytes_and_captures_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        std::fs::write(&path, b"file contents here").unwrap();

        let from_file = scan(Source::Path(&path), &Algorithm::ALL, None).unwrap();
        let from_bytes =
            scan(Source::Bytes(b"file contents here"), &Algorithm::ALL, None).unwrap();

        assert_eq!(from_file.digests, from_bytes.digests);
        assert_eq!(from_file.size, 18);
        assert!(from_file.source_mtime.is_some());
        assert!(from_bytes.source_mtime.is_none());
    }

    #[test]
    fn sample_is_capped() {
        let data = vec![0x5au8; SAMPLE_SIZE * 3];
        let outcome = scan(Source::Bytes(&data), &[Algorithm::Sha256], None).unwrap();
        assert_eq!(outcome.sample.len(), SAMPLE_SIZE);
        assert_eq!(outcome.size, (SAMPLE_SIZE * 3) as u64);
    }

    #[test]
    fn sink_receives_every_byte() {
        let data = b"teed through to the temp blob";
        let mut sink = Vec::new();
        let outcome =
            scan(Source::Bytes(data), &[Algorithm::Sha256], Some(&mut sink)).unwrap();
        assert_eq!(sink, data);
        assert_eq!(outcome.size, data.len() as u64);
    }

    #[test]
    fn empty_source() {
        let outcome = scan(Source::Bytes(b""), &Algorithm::ALL, None).unwrap();
        assert_eq!(outcome.size, 0);
        assert!(outcome.sample.is_empty());
        assert_eq!(outcome.digests.len(), 5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        assert!(scan(Source::Path(&path), &[Algorithm::Sha256], None).is_err());
    }
}
