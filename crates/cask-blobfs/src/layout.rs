//! Path derivation and permission handling for the blob tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base32::Alphabet;

use cask_types::DigestUri;

/// The default umask applied when the caller does not supply one.
pub const DEFAULT_UMASK: u32 = 0o022;

/// Segment widths of the hashed directory split.
const SPLIT: [usize; 3] = [4, 4, 4];

/// Derive the relative path of a blob under `store/` from its primary
/// digest: lower-case unpadded Base32 of the raw bytes, split into
/// `4/4/4/rest` segments.
pub fn relative_blob_path(digest: &DigestUri) -> PathBuf {
    let encoded = base32::encode(Alphabet::Rfc4648Lower { padding: false }, digest.as_bytes());
    let mut path = PathBuf::new();
    let mut rest = encoded.as_str();
    for width in SPLIT {
        let (segment, tail) = rest.split_at(width.min(rest.len()));
        path.push(segment);
        rest = tail;
        if rest.is_empty() {
            return path;
        }
    }
    path.push(rest);
    path
}

/// Directory creation mode: `0777 & ~umask`, with the setgid bit where the
/// platform honors it.
pub(crate) const fn dir_mode(umask: u32) -> u32 {
    0o2777 & !umask
}

/// Settled-blob file mode: `0444 & ~umask`.
pub(crate) const fn file_mode(umask: u32) -> u32 {
    0o444 & !umask
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Create a directory chain below `base`, applying the directory mode to
/// every component from `base` down. Chmod on pre-existing components is
/// idempotent.
pub(crate) fn ensure_dir_chain(base: &Path, relative: &Path, umask: u32) -> io::Result<()> {
    let mut current = base.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => set_mode(&current, dir_mode(umask))?,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_types::Algorithm;

    fn digest(algorithm: Algorithm, fill: u8) -> DigestUri {
        DigestUri::new(algorithm, vec![fill; algorithm.digest_len()]).unwrap()
    }

    #[test]
    fn sha256_path_shape() {
        let path = relative_blob_path(&digest(Algorithm::Sha256, 0));
        // 32 bytes -> 52 base32 characters -> 4/4/4/40.
        let segments: Vec<_> = path.iter().map(|s| s.to_str().unwrap()).collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], "aaaa");
        assert_eq!(segments[1], "aaaa");
        assert_eq!(segments[2], "aaaa");
        assert_eq!(segments[3].len(), 40);
    }

    #[test]
    fn md5_path_shape() {
        let path = relative_blob_path(&digest(Algorithm::Md5, 0xff));
        // 16 bytes -> 26 base32 characters -> 4/4/4/14.
        let segments: Vec<_> = path.iter().map(|s| s.to_str().unwrap()).collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[3].len(), 14);
    }

    #[test]
    fn encoding_is_lowercase_unpadded() {
        let path = relative_blob_path(&digest(Algorithm::Sha512, 0xab));
        let joined = path.to_str().unwrap().replace('/', "");
        assert!(!joined.contains('='));
        assert_eq!(joined, joined.to_ascii_lowercase());
        // 64 bytes -> ceil(64 * 8 / 5) = 103 characters.
        assert_eq!(joined.len(), 103);
    }

    #[test]
    fn distinct_digests_distinct_paths() {
        let a = relative_blob_path(&digest(Algorithm::Sha256, 1));
        let b = relative_blob_path(&digest(Algorithm::Sha256, 2));
        assert_ne!(a, b);
    }

    #[test]
    fn modes_respect_umask() {
        assert_eq!(dir_mode(0o022), 0o2755);
        assert_eq!(file_mode(0o022), 0o444);
        assert_eq!(file_mode(0o077), 0o400);
    }
}
