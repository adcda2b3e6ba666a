//! Manifest generation.
//!
//! Collects [`DigestEntry`] values and serializes them once, after every asset
//! has been digested. The serialized bytes are what gets signed and packaged.

use super::DigestEntry;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Canonical name of the manifest entry inside a pass.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Filename to hex digest mapping.
pub type Manifest = BTreeMap<String, String>;

/// Collects digest entries until every asset is processed.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    entries: Manifest,
}

impl ManifestBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one digest entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if an entry with the same name was
    /// already added; the manifest keys must be unique.
    pub fn insert(&mut self, entry: DigestEntry) -> Result<()> {
        if self.entries.contains_key(&entry.name) {
            return Err(Error::Serialization(format!(
                "duplicate manifest entry: {}",
                entry.name
            )));
        }
        self.entries.insert(entry.name, entry.digest);
        Ok(())
    }

    /// Number of entries collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the collected entries as compact JSON with sorted keys.
    pub fn finish(self) -> Result<SerializedManifest> {
        let bytes = serde_json::to_vec(&self.entries)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(SerializedManifest {
            entries: self.entries,
            bytes,
        })
    }
}

/// A manifest frozen to the exact bytes that are signed and packaged.
#[derive(Debug, Clone)]
pub struct SerializedManifest {
    entries: Manifest,
    bytes: Vec<u8>,
}

impl SerializedManifest {
    /// The serialized document.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The entries the document was serialized from.
    pub fn entries(&self) -> &Manifest {
        &self.entries
    }

    /// Parses manifest bytes read back from an archive.
    pub fn parse(bytes: &[u8]) -> Result<Manifest> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
