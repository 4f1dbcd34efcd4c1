use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// RAII guard for atomic file replacement under a `.lock` file.
///
/// Index rewrites go through this: create `<path>.lock` with
/// create-new semantics, write the new contents, then [`commit`]
/// flushes, fsyncs and renames over the target. Dropping without
/// committing removes the lock file and leaves the target untouched.
///
/// [`commit`]: LockFile::commit
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    /// Acquire the lock for `path`. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if another writer holds it.
    pub fn acquire(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = PathBuf::from(format!("{}.lock", path.display()));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("lock file {} is held", lock_path.display()),
                    )
                } else {
                    e
                }
            })?;

        Ok(Self {
            path,
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    /// Flush, fsync and atomically rename the lock file over the target.
    pub fn commit(mut self) -> io::Result<()> {
        if let Some(ref mut file) = self.file {
            file.flush()?;
            file.sync_all()?;
        }
        self.file.take();
        fs::rename(&self.lock_path, &self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .flush()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
