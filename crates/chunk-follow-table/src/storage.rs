//! Local-filesystem storage helpers.
//!
//! All IO in this crate goes through this module: reading the metadata
//! document, opening chunk files, and publishing new files with
//! write-then-rename semantics so a crashed writer never leaves a
//! half-written file at its final path. Everything is synchronous blocking
//! IO; the dataset model has no background tasks.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use snafu::{Backtrace, prelude::*};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The root location of a dataset.
///
/// Only the local filesystem is supported; the enum leaves room for object
/// storage backends without rewriting the writer and reader.
#[derive(Clone, Debug)]
pub enum TableLocation {
    /// A dataset stored on the local filesystem at the given root path.
    Local(PathBuf),
}

impl TableLocation {
    /// Creates a `TableLocation` for a local filesystem root.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }

    /// Join the root with a relative path into an absolute local path.
    pub fn join(&self, rel: &Path) -> PathBuf {
        match self {
            TableLocation::Local(root) => root.join(rel),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Any other I/O error on the local filesystem.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).context(IoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Ensures cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard so the file is NOT removed on drop.
    /// Call this after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we're likely already handling another error.
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload is written to a temporary sibling file, synced, and renamed
/// into place so readers never observe a truncated file at the final path.
/// Intermediate directories are created as needed.
pub fn write_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs)?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = File::create(&tmp_path).context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
        file.write_all(contents).context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
        file.sync_all().context(IoSnafu {
            path: tmp_path.display().to_string(),
        })?;
    }

    fs::rename(&tmp_path, &abs).context(IoSnafu {
        path: abs.display().to_string(),
    })?;

    // Renamed into place; nothing left to clean up.
    guard.disarm();

    Ok(())
}

/// Read the file at `rel_path` within `location` into a `String`.
///
/// A missing file is classified as [`StorageError::NotFound`]; other
/// filesystem problems produce [`StorageError::Io`].
pub fn read_to_string(location: &TableLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = location.join(rel_path);
    match fs::read_to_string(&abs) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e).context(NotFoundSnafu {
            path: abs.display().to_string(),
        }),
        Err(e) => Err(e).context(IoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

/// Open the file at `rel_path` within `location` for reading.
///
/// Missing files are classified as [`StorageError::NotFound`] so callers can
/// map them to their own taxonomy (for example, a missing chunk).
pub fn open_file(location: &TableLocation, rel_path: &Path) -> StorageResult<File> {
    let abs = location.join(rel_path);
    match File::open(&abs) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e).context(NotFoundSnafu {
            path: abs.display().to_string(),
        }),
        Err(e) => Err(e).context(IoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn write_atomic_creates_file_with_contents() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        write_atomic(&location, Path::new("test.txt"), b"hello world")?;

        let read_back = fs::read_to_string(tmp.path().join("test.txt"))?;
        assert_eq!(read_back, "hello world");
        Ok(())
    }

    #[test]
    fn write_atomic_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        write_atomic(&location, Path::new("nested/deep/dir/file.txt"), b"nested")?;

        let abs = tmp.path().join("nested/deep/dir/file.txt");
        assert_eq!(fs::read_to_string(abs)?, "nested");
        Ok(())
    }

    #[test]
    fn write_atomic_overwrites_existing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("overwrite.txt");

        write_atomic(&location, rel, b"original")?;
        write_atomic(&location, rel, b"updated")?;

        assert_eq!(fs::read_to_string(tmp.path().join(rel))?, "updated");
        Ok(())
    }

    #[test]
    fn write_atomic_no_leftover_tmp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        write_atomic(&location, Path::new("clean.txt"), b"data")?;

        assert!(!tmp.path().join("clean.tmp").exists());
        Ok(())
    }

    #[test]
    fn read_to_string_returns_not_found_for_missing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let err = read_to_string(&location, Path::new("does_not_exist.txt"))
            .expect_err("expected NotFound error");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn open_file_classifies_missing_files() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let err = open_file(&location, Path::new("absent.csv")).expect_err("expected NotFound");
        assert!(matches!(err, StorageError::NotFound { .. }));

        fs::write(tmp.path().join("present.csv"), "x\n1\n")?;
        assert!(open_file(&location, Path::new("present.csv")).is_ok());
        Ok(())
    }

    #[test]
    fn write_then_read_roundtrip() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("roundtrip.txt");

        write_atomic(&location, rel, "roundtrip content 🎉".as_bytes())?;

        assert_eq!(read_to_string(&location, rel)?, "roundtrip content 🎉");
        Ok(())
    }
}
