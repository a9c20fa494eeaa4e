use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use cask_types::{DigestUri, Stamp};

use crate::error::{BlobError, BlobResult};
use crate::layout::{ensure_dir_chain, file_mode, relative_blob_path, set_mode, DEFAULT_UMASK};

/// The on-disk blob tree.
///
/// The root holds `store/` (the hashed tree keyed by the primary digest) and
/// `tmp/` (blobs being written, before settle). Both live on the same
/// filesystem so the settle rename is atomic. No per-file locking exists;
/// atomic rename and unlink carry all the concurrency weight.
pub struct BlobFs {
    store_dir: PathBuf,
    tmp_dir: PathBuf,
    umask: u32,
}

impl BlobFs {
    /// Open (or create) the blob tree under `root`.
    ///
    /// `store/` and `tmp/` are created with mode `0777 & ~umask` (setgid
    /// where supported). Permission failures here are hard errors.
    pub fn open(root: &Path, umask: Option<u32>) -> BlobResult<Self> {
        let umask = umask.unwrap_or(DEFAULT_UMASK);
        let store_dir = root.join("store");
        let tmp_dir = root.join("tmp");

        fs::create_dir_all(root).map_err(|source| BlobError::Setup {
            path: root.to_path_buf(),
            source,
        })?;
        for name in ["store", "tmp"] {
            ensure_dir_chain(root, Path::new(name), umask).map_err(|source| BlobError::Setup {
                path: root.join(name),
                source,
            })?;
        }

        Ok(Self {
            store_dir,
            tmp_dir,
            umask,
        })
    }

    /// The absolute path a digest's blob settles at.
    pub fn path_for(&self, digest: &DigestUri) -> PathBuf {
        self.store_dir.join(relative_blob_path(digest))
    }

    /// Obtain a temp blob in `tmp/` to stream content into.
    pub fn temp(&self) -> BlobResult<TempBlob> {
        let file = NamedTempFile::new_in(&self.tmp_dir)?;
        Ok(TempBlob { file })
    }

    /// Finalize a temp blob at its digest-derived path.
    ///
    /// Ensures the parent chain, then atomically renames the temp file into
    /// place, chmods it read-only, and stamps its mtime. When the target
    /// already exists and `overwrite` is false the temp blob is discarded
    /// and `false` returned.
    pub fn settle(
        &self,
        digest: &DigestUri,
        mut temp: TempBlob,
        mtime: Option<Stamp>,
        overwrite: bool,
    ) -> BlobResult<bool> {
        temp.file.flush()?;

        let target = self.path_for(digest);
        if target.exists() && !overwrite {
            debug!(digest = %digest, "blob already settled; discarding temp");
            return Ok(false);
        }

        let relative = relative_blob_path(digest);
        if let Some(parent) = relative.parent() {
            ensure_dir_chain(&self.store_dir, parent, self.umask)?;
        }

        let file = temp
            .file
            .persist(&target)
            .map_err(|e| BlobError::Io(e.error))?;
        set_mode(&target, file_mode(self.umask))?;
        file.set_modified(mtime.unwrap_or_else(Stamp::now).to_system_time())?;

        debug!(digest = %digest, path = %target.display(), "blob settled");
        Ok(true)
    }

    /// Look up the blob for a digest.
    ///
    /// A missing path is `None`. A path that exists but is not a readable
    /// regular file means the tree is damaged and is a hard error. With
    /// `direct` the handle is opened immediately; otherwise it opens lazily
    /// so large result sets defer file descriptors.
    pub fn get(&self, digest: &DigestUri, direct: bool) -> BlobResult<Option<BlobHandle>> {
        let path = self.path_for(digest);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(BlobError::CorruptBlob { path });
        }
        let file = if direct {
            Some(File::open(&path).map_err(|_| BlobError::CorruptBlob { path: path.clone() })?)
        } else {
            None
        };
        Ok(Some(BlobHandle { path, file }))
    }

    /// Erase the blob for a digest.
    ///
    /// The file is opened first so its content is still readable by the
    /// caller through the returned handle, then unlinked. Empty ancestor
    /// directories beneath `store/` are pruned best-effort.
    pub fn erase(&self, digest: &DigestUri) -> BlobResult<Option<BlobHandle>> {
        let path = self.path_for(digest);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&path)?;
        self.prune_above(&path);
        debug!(digest = %digest, "blob erased");
        Ok(Some(BlobHandle {
            path,
            file: Some(file),
        }))
    }

    /// Remove now-empty ancestors of an erased blob, stopping at `store/`.
    ///
    /// Errors are ignored: a non-empty directory ends the walk, and losing a
    /// race against a concurrent insert is harmless because the inserter
    /// recreates missing directories.
    fn prune_above(&self, blob_path: &Path) {
        let mut current = blob_path.parent();
        while let Some(dir) = current {
            if dir == self.store_dir {
                break;
            }
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) => {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(dir = %dir.display(), error = %e, "directory prune stopped");
                    }
                    break;
                }
            }
            current = dir.parent();
        }
    }

    /// The `store/` directory.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// The `tmp/` directory.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }
}

/// A blob being written, before settle. Dropping it unlinks the temp file.
pub struct TempBlob {
    file: NamedTempFile,
}

impl Write for TempBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// A readable reference to a settled blob.
///
/// Holds the blob path and, when opened directly (or returned from erase),
/// an already-open file. The lazy form defers the open so that listing many
/// objects does not exhaust file descriptors.
#[derive(Debug)]
pub struct BlobHandle {
    path: PathBuf,
    file: Option<File>,
}

impl BlobHandle {
    /// The blob's path. After an erase this path no longer exists.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh reader on the blob.
    pub fn open(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Consume the handle into an open file, opening lazily if needed.
    pub fn into_file(self) -> io::Result<File> {
        match self.file {
            Some(file) => Ok(file),
            None => File::open(&self.path),
        }
    }

    /// Read the whole blob into memory.
    pub fn read_to_vec(self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.into_file()?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_types::Algorithm;

    fn digest(fill: u8) -> DigestUri {
        DigestUri::new(Algorithm::Sha256, vec![fill; 32]).unwrap()
    }

    fn write_blob(bfs: &BlobFs, digest: &DigestUri, content: &[u8]) {
        let mut temp = bfs.temp().unwrap();
        temp.write_all(content).unwrap();
        assert!(bfs.settle(digest, temp, None, false).unwrap());
    }

    #[test]
    fn open_creates_store_and_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        assert!(bfs.store_dir().is_dir());
        assert!(bfs.tmp_dir().is_dir());
    }

    #[test]
    fn settle_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        let d = digest(1);

        write_blob(&bfs, &d, b"blob content");

        let handle = bfs.get(&d, false).unwrap().unwrap();
        assert_eq!(handle.read_to_vec().unwrap(), b"blob content");
    }

    #[test]
    fn settle_discards_when_target_exists() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        let d = digest(2);

        write_blob(&bfs, &d, b"first");

        let mut temp = bfs.temp().unwrap();
        temp.write_all(b"second").unwrap();
        assert!(!bfs.settle(&d, temp, None, false).unwrap());

        let handle = bfs.get(&d, true).unwrap().unwrap();
        assert_eq!(handle.read_to_vec().unwrap(), b"first");
    }

    #[test]
    fn settle_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        let d = digest(3);

        write_blob(&bfs, &d, b"first");

        let mut temp = bfs.temp().unwrap();
        temp.write_all(b"second").unwrap();
        // The settled file is read-only; the rename itself still succeeds.
        assert!(bfs.settle(&d, temp, None, true).unwrap());

        let handle = bfs.get(&d, true).unwrap().unwrap();
        assert_eq!(handle.read_to_vec().unwrap(), b"second");
    }

    #[test]
    fn get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        assert!(bfs.get(&digest(4), false).unwrap().is_none());
    }

    #[test]
    fn get_on_directory_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        let d = digest(5);

        fs::create_dir_all(bfs.path_for(&d)).unwrap();
        let err = bfs.get(&d, false).unwrap_err();
        assert!(matches!(err, BlobError::CorruptBlob { .. }));
    }

    #[test]
    fn erase_returns_content_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        let d = digest(6);

        write_blob(&bfs, &d, b"to be erased");
        let first_segment = bfs.path_for(&d);
        let first_segment = first_segment
            .strip_prefix(bfs.store_dir())
            .unwrap()
            .components()
            .next()
            .unwrap();
        let first_dir = bfs.store_dir().join(first_segment);
        assert!(first_dir.is_dir());

        let handle = bfs.erase(&d).unwrap().unwrap();
        assert_eq!(handle.into_file().unwrap().bytes().count(), 12);
        assert!(bfs.get(&d, false).unwrap().is_none());
        // The whole hashed chain under store/ is gone.
        assert!(!first_dir.exists());
        assert!(bfs.store_dir().is_dir());
    }

    #[test]
    fn erase_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        assert!(bfs.erase(&digest(7)).unwrap().is_none());
    }

    #[test]
    fn prune_keeps_shared_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        // Same leading byte means a shared first path segment.
        let a = DigestUri::new(Algorithm::Sha256, {
            let mut b = vec![9u8; 32];
            b[31] = 1;
            b
        })
        .unwrap();
        let b = DigestUri::new(Algorithm::Sha256, {
            let mut v = vec![9u8; 32];
            v[31] = 2;
            v
        })
        .unwrap();

        write_blob(&bfs, &a, b"a");
        write_blob(&bfs, &b, b"b");

        bfs.erase(&a).unwrap().unwrap();
        // b's blob still resolves; its chain survived the prune.
        assert!(bfs.get(&b, false).unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn settled_blob_is_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), Some(0o022)).unwrap();
        let d = digest(8);
        write_blob(&bfs, &d, b"mode check");

        let mode = fs::metadata(bfs.path_for(&d)).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o444);
    }

    #[test]
    fn settle_applies_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        let d = digest(9);

        let mtime = Stamp::from_unix_secs(1_600_000_000);
        let mut temp = bfs.temp().unwrap();
        temp.write_all(b"stamped").unwrap();
        bfs.settle(&d, temp, Some(mtime), false).unwrap();

        let modified = fs::metadata(bfs.path_for(&d)).unwrap().modified().unwrap();
        assert_eq!(Stamp::from(modified).as_unix_secs(), 1_600_000_000);
    }

    #[test]
    fn dropping_temp_unlinks_it() {
        let dir = tempfile::tempdir().unwrap();
        let bfs = BlobFs::open(dir.path(), None).unwrap();
        {
            let mut temp = bfs.temp().unwrap();
            temp.write_all(b"abandoned").unwrap();
        }
        let leftovers = fs::read_dir(bfs.tmp_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
