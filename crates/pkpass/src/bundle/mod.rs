//! Pass bundle contents: asset listing, per-file digests and the manifest.
//!
//! This module provides functionality to:
//! - List the loose files of a pass directory in a stable order
//! - Digest each file while streaming it into the output container
//! - Collect the digests into the canonical `manifest.json` document
//!
//! # Manifest Format
//!
//! The manifest is a flat JSON object mapping each asset file name to the
//! lowercase hex digest of its bytes:
//!
//! ```text
//! {"icon.png":"9f86d0...","pass.json":"2c26b4..."}
//! ```
//!
//! Keys are sorted and the document carries no whitespace, so the same
//! assets always serialize to the same bytes.

pub mod assets;
pub mod digest;
pub mod manifest;

pub use assets::{list_assets, Asset};
pub use digest::{digest_asset, hash_bytes, DigestAlgorithm, DigestEntry, DigestWriter};
pub use manifest::{Manifest, ManifestBuilder, SerializedManifest};
