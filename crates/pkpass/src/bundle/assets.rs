//! Pass directory listing.
//!
//! A pass directory is flat: every regular file directly inside it becomes an
//! asset, directories are skipped silently. Symlinks are followed so a linked
//! file is packaged with its target's bytes.

use crate::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A named file inside the pass directory.
///
/// Only the location is kept; the bytes are streamed by the digest stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// File name used for the container entry and the manifest key.
    pub name: String,
    /// Absolute or caller-relative path to read the bytes from.
    pub path: PathBuf,
}

/// Lists the assets of a pass directory, sorted by file name.
///
/// Entries whose name starts with one of `exclusions` are left out.
///
/// # Errors
///
/// Returns [`Error::AssetRead`] naming the pass directory if it does not exist
/// or is not a directory, [`Error::AssetRead`] naming the entry if an entry
/// cannot be inspected, and
/// [`Error::Serialization`] if a file name is not valid UTF-8 (it could not
/// be written into the JSON manifest).
pub fn list_assets(pass_dir: impl AsRef<Path>, exclusions: &[String]) -> Result<Vec<Asset>> {
    let pass_dir = pass_dir.as_ref();

    if !pass_dir.exists() {
        return Err(Error::asset_read(
            pass_dir.display().to_string(),
            io::Error::new(io::ErrorKind::NotFound, "pass directory not found"),
        ));
    }

    if !pass_dir.is_dir() {
        return Err(Error::asset_read(
            pass_dir.display().to_string(),
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let mut assets = Vec::new();

    for entry in WalkDir::new(pass_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let name = e
                .path()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| pass_dir.display().to_string());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop while listing pass directory"));
            Error::asset_read(name, source)
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_str().ok_or_else(|| {
            Error::Serialization(format!(
                "asset name is not valid UTF-8: {}",
                entry.file_name().to_string_lossy()
            ))
        })?;

        if exclusions.iter().any(|pattern| name.starts_with(pattern.as_str())) {
            continue;
        }

        assets.push(Asset {
            name: name.to_string(),
            path: entry.path().to_path_buf(),
        });
    }

    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(assets: &[Asset]) -> Vec<&str> {
        assets.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_lists_files_sorted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pass.json"), b"{}").unwrap();
        fs::write(dir.path().join("icon.png"), b"PNG").unwrap();
        fs::write(dir.path().join("logo@2x.png"), b"PNG2").unwrap();

        let assets = list_assets(dir.path(), &[]).unwrap();
        assert_eq!(names(&assets), vec!["icon.png", "logo@2x.png", "pass.json"]);
        assert_eq!(assets[0].path, dir.path().join("icon.png"));
    }

    #[test]
    fn test_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pass.json"), b"{}").unwrap();
        fs::create_dir(dir.path().join("en.lproj")).unwrap();
        fs::write(dir.path().join("en.lproj").join("pass.strings"), b"x").unwrap();

        let assets = list_assets(dir.path(), &[]).unwrap();
        assert_eq!(names(&assets), vec!["pass.json"]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let assets = list_assets(dir.path(), &[]).unwrap();
        assert!(assets.is_empty());
    }

    #[test]
    fn test_exclusions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pass.json"), b"{}").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();

        let assets = list_assets(dir.path(), &[".DS_Store".to_string()]).unwrap();
        assert_eq!(names(&assets), vec!["pass.json"]);
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.pass");
        let err = list_assets(&missing, &[]).unwrap_err();
        assert!(err.is_input_error());
        match err {
            Error::AssetRead { name, source } => {
                assert_eq!(name, missing.display().to_string());
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected asset read error, got {other:?}"),
        }
    }

    #[test]
    fn test_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("pass.json");
        fs::write(&file, b"{}").unwrap();
        let err = list_assets(&file, &[]).unwrap_err();
        assert!(matches!(err, Error::AssetRead { .. }));
        assert!(err.is_input_error());
    }

    #[test]
    #[cfg(unix)]
    fn test_follows_file_symlinks() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("shared.png"), b"PNG").unwrap();
        symlink(outside.path().join("shared.png"), dir.path().join("icon.png")).unwrap();
        symlink(outside.path(), dir.path().join("linked_dir")).unwrap();

        let assets = list_assets(dir.path(), &[]).unwrap();
        assert_eq!(names(&assets), vec!["icon.png"]);
    }
}
