//! Pass archive composition.
//!
//! Owns the output ZIP container for one build and enforces its shape:
//! every asset entry is written once, then `manifest.json`, then `signature`,
//! then the archive is finished. Writes out of that order are rejected.
//!
//! # Features
//!
//! - Configurable compression via [`CompressionLevel`]
//! - Fixed entry timestamps and permissions for reproducible output
//! - Reserved entry names cannot be shadowed by assets

use crate::bundle::manifest::MANIFEST_ENTRY;
use crate::bundle::SerializedManifest;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::io::{Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Name of the detached signature entry inside a pass.
pub const SIGNATURE_ENTRY: &str = "signature";

/// Entry names written by the pipeline itself.
pub const RESERVED_ENTRIES: [&str; 2] = [MANIFEST_ENTRY, SIGNATURE_ENTRY];

/// ZIP compression level for pass creation.
///
/// # Examples
///
/// ```
/// use pkpass::pass::CompressionLevel;
///
/// let fast = CompressionLevel::NONE;
/// let balanced = CompressionLevel::DEFAULT;
/// let custom = CompressionLevel::new(3);
/// assert_eq!(custom.level(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// No compression (level 0). Entries are stored.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Default compression (level 6).
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Maximum compression (level 9).
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9.
    ///
    /// Values greater than 9 are clamped to 9.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    /// Returns the compression level value (0-9).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        if self.0 == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(self.0)))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Byte sink for the asset entry opened by [`ArchiveComposer::start_asset`].
pub struct EntryWriter<'a, W: Write + Seek> {
    zip: &'a mut ZipWriter<W>,
}

impl<W: Write + Seek> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.zip.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.zip.flush()
    }
}

/// Write phase of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Assets,
    Manifest,
    Signature,
}

/// Single-use writer for one pass archive.
pub struct ArchiveComposer<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
    entries: BTreeSet<String>,
    order: Vec<String>,
    phase: Phase,
}

impl<W: Write + Seek> ArchiveComposer<W> {
    /// Starts an empty archive on `sink`.
    pub fn new(sink: W, compression_level: CompressionLevel) -> Self {
        Self {
            zip: ZipWriter::new(sink),
            options: compression_level.file_options(),
            entries: BTreeSet::new(),
            order: Vec::new(),
            phase: Phase::Assets,
        }
    }

    /// Opens a new asset entry and returns the sink to stream its bytes into.
    ///
    /// The sink only writes into the open entry; it cannot start new ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Archive`] if the manifest was already written, the
    /// name is reserved, or an entry with that name exists.
    pub fn start_asset(&mut self, name: &str) -> Result<EntryWriter<'_, W>> {
        if self.phase != Phase::Assets {
            return Err(Error::Archive(format!(
                "Cannot add asset '{name}' after the manifest was written"
            )));
        }
        if RESERVED_ENTRIES.contains(&name) {
            return Err(Error::Archive(format!(
                "Asset '{name}' collides with a reserved pass entry"
            )));
        }
        self.start_entry(name)?;
        Ok(EntryWriter { zip: &mut self.zip })
    }

    /// Writes the manifest entry. Closes the asset phase.
    pub fn write_manifest(&mut self, manifest: &SerializedManifest) -> Result<()> {
        if self.phase != Phase::Assets {
            return Err(Error::Archive("Manifest already written".into()));
        }
        self.start_entry(MANIFEST_ENTRY)?;
        self.zip
            .write_all(manifest.as_bytes())
            .map_err(|e| Error::Archive(format!("Failed to write manifest: {e}")))?;
        self.phase = Phase::Manifest;
        Ok(())
    }

    /// Writes the signature entry. Only valid right after the manifest.
    pub fn write_signature(&mut self, signature: &[u8]) -> Result<()> {
        match self.phase {
            Phase::Assets => {
                return Err(Error::Archive(
                    "Signature cannot be written before the manifest".into(),
                ))
            }
            Phase::Signature => return Err(Error::Archive("Signature already written".into())),
            Phase::Manifest => {}
        }
        self.start_entry(SIGNATURE_ENTRY)?;
        self.zip
            .write_all(signature)
            .map_err(|e| Error::Archive(format!("Failed to write signature: {e}")))?;
        self.phase = Phase::Signature;
        Ok(())
    }

    /// Entry names in the order they were written.
    pub fn entry_names(&self) -> &[String] {
        &self.order
    }

    /// Writes the central directory and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Archive`] unless both the manifest and the signature
    /// were written, and [`Error::Zip`] if the container cannot be closed.
    pub fn finish(self) -> Result<W> {
        if self.phase != Phase::Signature {
            return Err(Error::Archive(
                "Cannot finalize a pass without manifest and signature".into(),
            ));
        }
        let mut sink = self.zip.finish()?;
        sink.flush()
            .map_err(|e| Error::Archive(format!("Failed to flush archive: {e}")))?;
        Ok(sink)
    }

    fn start_entry(&mut self, name: &str) -> Result<()> {
        if !self.entries.insert(name.to_string()) {
            return Err(Error::Archive(format!("Duplicate entry: {name}")));
        }
        self.zip.start_file(name, self.options)?;
        self.order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{DigestEntry, ManifestBuilder};
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn manifest() -> SerializedManifest {
        let mut builder = ManifestBuilder::new();
        builder
            .insert(DigestEntry {
                name: "pass.json".into(),
                digest: "00".into(),
            })
            .unwrap();
        builder.finish().unwrap()
    }

    fn composer(level: CompressionLevel) -> ArchiveComposer<Cursor<Vec<u8>>> {
        ArchiveComposer::new(Cursor::new(Vec::new()), level)
    }

    #[test]
    fn test_full_sequence() {
        let mut archive = composer(CompressionLevel::DEFAULT);
        archive
            .start_asset("pass.json")
            .unwrap()
            .write_all(b"{\"formatVersion\":1}")
            .unwrap();
        archive.write_manifest(&manifest()).unwrap();
        archive.write_signature(b"\x30\x80").unwrap();
        assert_eq!(
            archive.entry_names(),
            &["pass.json", "manifest.json", "signature"]
        );

        let bytes = archive.finish().unwrap().into_inner();
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 3);

        let mut content = Vec::new();
        zip.by_name("pass.json").unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"{\"formatVersion\":1}");

        let mut sig = Vec::new();
        zip.by_name("signature").unwrap().read_to_end(&mut sig).unwrap();
        assert_eq!(sig, b"\x30\x80");
    }

    #[test]
    fn test_entry_writer_streams_into_open_entry() {
        let mut archive = composer(CompressionLevel::DEFAULT);
        {
            let mut sink = archive.start_asset("strip.png").unwrap();
            for chunk in [&b"PNG"[..], b"-", b"data"] {
                sink.write_all(chunk).unwrap();
            }
            sink.flush().unwrap();
        }
        archive.start_asset("thumbnail.png").unwrap().write_all(b"thumb").unwrap();
        archive.write_manifest(&manifest()).unwrap();
        archive.write_signature(b"sig").unwrap();
        assert_eq!(
            archive.entry_names(),
            &["strip.png", "thumbnail.png", "manifest.json", "signature"]
        );

        let bytes = archive.finish().unwrap().into_inner();
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = Vec::new();
        zip.by_name("strip.png").unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"PNG-data");
    }

    #[test]
    fn test_duplicate_asset_rejected() {
        let mut archive = composer(CompressionLevel::NONE);
        archive.start_asset("icon.png").unwrap();
        assert!(matches!(archive.start_asset("icon.png"), Err(Error::Archive(_))));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut archive = composer(CompressionLevel::NONE);
        assert!(matches!(archive.start_asset("manifest.json"), Err(Error::Archive(_))));
        assert!(matches!(archive.start_asset("signature"), Err(Error::Archive(_))));
    }

    #[test]
    fn test_asset_after_manifest_rejected() {
        let mut archive = composer(CompressionLevel::NONE);
        archive.write_manifest(&manifest()).unwrap();
        assert!(archive.start_asset("late.png").is_err());
        assert!(archive.write_manifest(&manifest()).is_err());
    }

    #[test]
    fn test_signature_order_enforced() {
        let mut archive = composer(CompressionLevel::NONE);
        assert!(archive.write_signature(b"sig").is_err());
        archive.write_manifest(&manifest()).unwrap();
        archive.write_signature(b"sig").unwrap();
        assert!(archive.write_signature(b"sig").is_err());
    }

    #[test]
    fn test_finish_requires_signature() {
        let archive = composer(CompressionLevel::NONE);
        assert!(matches!(archive.finish(), Err(Error::Archive(_))));

        let mut archive = composer(CompressionLevel::NONE);
        archive.write_manifest(&manifest()).unwrap();
        assert!(matches!(archive.finish(), Err(Error::Archive(_))));
    }

    #[test]
    fn test_output_is_reproducible() {
        let build = || {
            let mut archive = composer(CompressionLevel::DEFAULT);
            archive.start_asset("a.txt").unwrap().write_all(b"alpha").unwrap();
            archive.write_manifest(&manifest()).unwrap();
            archive.write_signature(b"sig").unwrap();
            archive.finish().unwrap().into_inner()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_compression_level() {
        assert_eq!(CompressionLevel::NONE.level(), 0);
        assert_eq!(CompressionLevel::DEFAULT.level(), 6);
        assert_eq!(CompressionLevel::MAX.level(), 9);
        assert_eq!(CompressionLevel::new(15).level(), 9);
        assert_eq!(CompressionLevel::from(5).level(), 5);
    }

    #[test]
    fn test_stored_entries() {
        let mut archive = composer(CompressionLevel::NONE);
        archive.start_asset("a.txt").unwrap().write_all(b"alpha").unwrap();
        archive.write_manifest(&manifest()).unwrap();
        archive.write_signature(b"sig").unwrap();
        let bytes = archive.finish().unwrap().into_inner();

        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let entry = zip.by_name("a.txt").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }
}
