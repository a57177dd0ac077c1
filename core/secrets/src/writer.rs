//! Owner-only file creation for decrypted output.
//!
//! A new path is created with `O_EXCL` and mode 0600, so no other process can
//! hold a descriptor to it. An existing path is never written in place: the
//! content goes to a 0600 temporary file in the same directory, which is then
//! renamed over the target. Readers that opened the old file keep seeing the
//! old bytes, and nobody ever observes a half-written secret at the target.
//!
//! On non-Unix platforms the replace path deletes the target and re-creates
//! it. That leaves a short window in which the path does not exist and is not
//! atomic.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use publicpillar_common::{Error, Result};

/// Permission bits of every file the writer creates.
#[cfg(unix)]
pub const SECURE_MODE: u32 = 0o600;

/// Creates files that only their owner can read.
pub struct SecureWriter;

impl SecureWriter {
    /// Open `path` for writing secret content.
    ///
    /// A new file is written in place and is owner-only from its first byte.
    /// When `path` already exists the old content stays there until
    /// [`SecureFile::commit`].
    ///
    /// # Errors
    /// - I/O errors other than "already exists" are returned unchanged
    pub fn create(path: impl AsRef<Path>) -> Result<SecureFile> {
        let path = path.as_ref();

        match open_exclusive(path) {
            Ok(file) => {
                debug!(path = %path.display(), "Created new secure file");
                Ok(SecureFile::new(path, Pending::Fresh(file)))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => replace_existing(path),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write `contents` to `path` and commit.
    pub fn write(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
        let mut file = Self::create(path)?;
        file.write_all(contents)?;
        file.commit()
    }
}

/// A secret file being written.
///
/// Dropping it without [`SecureFile::commit`] discards the content: a freshly
/// created file is removed, a pending replacement is never moved into place.
pub struct SecureFile {
    path: PathBuf,
    pending: Option<Pending>,
}

enum Pending {
    Fresh(File),
    Replace(NamedTempFile),
}

impl SecureFile {
    fn new(path: &Path, pending: Pending) -> Self {
        Self {
            path: path.to_path_buf(),
            pending: Some(pending),
        }
    }

    /// Target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush to disk and, for replacements, move into place.
    pub fn commit(mut self) -> Result<()> {
        match self.pending.take() {
            Some(Pending::Fresh(file)) => file.sync_all()?,
            Some(Pending::Replace(temp)) => {
                temp.as_file().sync_all()?;
                temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
                debug!(path = %self.path.display(), "Replaced existing file");
            }
            None => {}
        }
        Ok(())
    }
}

impl Write for SecureFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.pending.as_mut() {
            Some(Pending::Fresh(file)) => file.write(buf),
            Some(Pending::Replace(temp)) => temp.write(buf),
            None => Err(io::Error::other("secure file already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.pending.as_mut() {
            Some(Pending::Fresh(file)) => file.flush(),
            Some(Pending::Replace(temp)) => temp.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for SecureFile {
    fn drop(&mut self) {
        if let Some(Pending::Fresh(file)) = self.pending.take() {
            drop(file);
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(SECURE_MODE)
        .open(path)
}

#[cfg(not(unix))]
fn open_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn replace_existing(path: &Path) -> Result<SecureFile> {
    // tempfile creates its files with mode 0600 on Unix.
    let temp = tempfile::Builder::new()
        .prefix(".ppillar-")
        .tempfile_in(parent_dir(path))?;
    Ok(SecureFile::new(path, Pending::Replace(temp)))
}

#[cfg(not(unix))]
fn replace_existing(path: &Path) -> Result<SecureFile> {
    tracing::warn!(
        path = %path.display(),
        "Atomic replace unavailable, deleting and re-creating target"
    );
    std::fs::remove_file(path)?;
    let file = open_exclusive(path)?;
    Ok(SecureFile::new(path, Pending::Fresh(file)))
}

#[cfg(unix)]
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
