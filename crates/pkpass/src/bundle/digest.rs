//! Per-asset digests.
//!
//! The digest of an asset and the bytes packaged for it come from the same
//! read: every chunk is hashed and written to the container before the next
//! chunk is read, so the manifest always describes exactly what was stored.

use super::Asset;
use crate::pass::ArchiveComposer;
use crate::{Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::str::FromStr;
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash algorithm used for manifest digests.
///
/// One algorithm is chosen per build and applies to every asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-256, 64 hex characters per digest.
    #[default]
    Sha256,
    /// SHA-1, 40 hex characters per digest. Only for verifiers that still
    /// expect the legacy manifest format.
    Sha1,
}

impl DigestAlgorithm {
    /// Length of a hex-encoded digest for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha1 => 40,
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => f.write_str("sha256"),
            DigestAlgorithm::Sha1 => f.write_str("sha1"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            other => Err(Error::Config(format!("Unknown digest algorithm: {other}"))),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha1(Sha1),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
        }
    }
}

/// File name and hex digest of one packaged asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    /// Asset file name.
    pub name: String,
    /// Lowercase hex digest of the asset bytes.
    pub digest: String,
}

/// A [`Write`] adapter that hashes every byte the inner writer accepts.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Hasher,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Wraps `inner`, hashing with `algorithm`.
    pub fn new(inner: W, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
            written: 0,
        }
    }

    /// Number of bytes passed through so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Returns the inner writer and the lowercase hex digest.
    pub fn finish(self) -> (W, String) {
        (self.inner, self.hasher.finalize_hex())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hashes an in-memory buffer.
pub fn hash_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Streams one asset into the container and returns its digest.
///
/// # Errors
///
/// Returns [`Error::AssetRead`] if the asset cannot be opened or read, and an
/// archive error if the container rejects the entry or a write.
pub fn digest_asset<W: Write + Seek>(
    composer: &mut ArchiveComposer<W>,
    asset: &Asset,
    algorithm: DigestAlgorithm,
) -> Result<DigestEntry> {
    let mut file = File::open(&asset.path).map_err(|e| Error::asset_read(&asset.name, e))?;

    let sink = composer.start_asset(&asset.name)?;
    let mut writer = DigestWriter::new(sink, algorithm);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::asset_read(&asset.name, e)),
        };
        writer.write_all(&buf[..n]).map_err(|e| {
            Error::Archive(format!("Failed to write entry '{}': {}", asset.name, e))
        })?;
    }

    let size = writer.bytes_written();
    let (_, digest) = writer.finish();
    debug!(asset = %asset.name, size, %digest, "digested asset");

    Ok(DigestEntry {
        name: asset.name.clone(),
        digest,
    })
}
