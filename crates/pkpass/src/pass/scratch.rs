//! Per-build scratch space.
//!
//! Holds the transient files of one build: the staged credential bundle, the
//! manifest handed to the signing engine, and whatever key or certificate
//! material the engine extracts. The directory is removed when the
//! [`ScratchSpace`] is dropped, on success and failure alike.

use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tracing::warn;

/// File name of the staged credential bundle.
pub const CREDENTIAL_FILE: &str = "certificates.p12";

/// Exclusively owned temporary directory for one build.
#[derive(Debug)]
pub struct ScratchSpace {
    path: PathBuf,
    // `None` once removed.
    dir: Option<TempDir>,
}

impl ScratchSpace {
    /// Creates scratch space in the system temporary directory.
    pub fn new() -> Result<Self> {
        let dir = Builder::new()
            .prefix("pkpass-")
            .tempdir()
            .map_err(|e| Error::ScratchSpace(format!("Failed to create temp directory: {e}")))?;
        Ok(Self::from_dir(dir))
    }

    /// Creates scratch space inside `root`.
    pub fn new_in(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let dir = Builder::new()
            .prefix("pkpass-")
            .tempdir_in(root)
            .map_err(|e| {
                Error::ScratchSpace(format!(
                    "Failed to create temp directory in {}: {e}",
                    root.display()
                ))
            })?;
        Ok(Self::from_dir(dir))
    }

    fn from_dir(dir: TempDir) -> Self {
        Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        }
    }

    /// Root of the scratch directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Writes `data` to a new file readable only by the current user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScratchSpace`] if the file exists or cannot be written.
    pub fn write_private(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.file(name);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&path)
            .map_err(|e| Error::ScratchSpace(format!("Failed to create {name}: {e}")))?;
        file.write_all(data)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::ScratchSpace(format!("Failed to write {name}: {e}")))?;
        Ok(path)
    }

    /// Copies the credential bundle into scratch space.
    pub fn stage_credential(&self, pkcs12: &[u8]) -> Result<PathBuf> {
        self.write_private(CREDENTIAL_FILE, pkcs12)
    }

    /// Reads a file back from scratch space.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        fs::read(self.file(name))
            .map_err(|e| Error::ScratchSpace(format!("Failed to read {name}: {e}")))
    }

    /// Removes the directory, reporting failures instead of ignoring them.
    pub fn close(mut self) -> Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        dir.close().map_err(|e| {
            Error::ScratchSpace(format!("Failed to remove {}: {e}", self.path.display()))
        })
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch space");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let path = {
            let scratch = ScratchSpace::new_in(root.path()).unwrap();
            scratch.stage_credential(b"p12").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_removed_on_close() {
        let root = TempDir::new().unwrap();
        let scratch = ScratchSpace::new_in(root.path()).unwrap();
        let path = scratch.path().to_path_buf();
        scratch.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_write_and_read() {
        let scratch = ScratchSpace::new().unwrap();
        let path = scratch.write_private("manifest.json", b"{}").unwrap();
        assert_eq!(path, scratch.file("manifest.json"));
        assert_eq!(scratch.read("manifest.json").unwrap(), b"{}");
    }

    #[test]
    fn test_write_refuses_overwrite() {
        let scratch = ScratchSpace::new().unwrap();
        scratch.write_private("key.pem", b"a").unwrap();
        assert!(matches!(
            scratch.write_private("key.pem", b"b"),
            Err(Error::ScratchSpace(_))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = ScratchSpace::new().unwrap();
        let path = scratch.stage_credential(b"p12").unwrap();
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_close_reports_removal_failure() {
        let scratch = ScratchSpace::new().unwrap();
        fs::remove_dir_all(scratch.path()).unwrap();
        assert!(matches!(scratch.close(), Err(Error::ScratchSpace(_))));
    }

    #[test]
    fn test_drop_tolerates_removal_failure() {
        let scratch = ScratchSpace::new().unwrap();
        let path = scratch.path().to_path_buf();
        fs::remove_dir_all(&path).unwrap();
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_root() {
        let root = TempDir::new().unwrap();
        let result = ScratchSpace::new_in(root.path().join("missing"));
        assert!(matches!(result, Err(Error::ScratchSpace(_))));
    }
}
