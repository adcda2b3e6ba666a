//! Pass archive verification.
//!
//! Checks a finished pass the way a device would: the entry set matches the
//! manifest, every digest matches the stored bytes, and the detached signature
//! covers the packaged manifest.

use super::archive::SIGNATURE_ENTRY;
use crate::bundle::manifest::MANIFEST_ENTRY;
use crate::bundle::{hash_bytes, DigestAlgorithm, Manifest, SerializedManifest};
use crate::crypto::TrustChain;
use crate::{Error, Result};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::{Stack, StackRef};
use openssl::x509::store::{X509Store, X509StoreBuilder, X509StoreRef};
use openssl::x509::X509;
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

/// Summary of a pass that passed verification.
#[derive(Debug, Clone)]
pub struct VerifiedPass {
    /// Manifest entries as packaged.
    pub manifest: Manifest,
    /// Exact manifest bytes the signature covers.
    pub manifest_bytes: Vec<u8>,
    /// Algorithm inferred from the manifest digests.
    pub digest_algorithm: DigestAlgorithm,
    /// Whether the signer certificate was validated against trusted roots.
    ///
    /// `false` means only the signature over the manifest was checked.
    pub chain_verified: bool,
}

/// Verifies archive bytes produced by [`crate::pass::PassSigner`].
///
/// # Arguments
///
/// * `archive` - The pass archive
/// * `chain` - Intermediate certificates to use when building the signer chain
/// * `roots` - Trusted roots; if empty, chain validation is skipped and only
///   the signature itself is checked
///
/// # Errors
///
/// Returns [`Error::Verification`] describing the first mismatch found.
pub fn verify_pass(
    archive: &[u8],
    chain: Option<&TrustChain>,
    roots: &[X509],
) -> Result<VerifiedPass> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| Error::Verification(format!("Not a valid zip archive: {e}")))?;

    let mut assets = BTreeSet::new();
    let mut manifest_bytes = None;
    let mut signature = None;
    let mut contents = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        match name.as_str() {
            MANIFEST_ENTRY => set_once(&mut manifest_bytes, &name, data)?,
            SIGNATURE_ENTRY => set_once(&mut signature, &name, data)?,
            _ => {
                if !assets.insert(name.clone()) {
                    return Err(Error::Verification(format!("Duplicate entry: {name}")));
                }
                contents.push((name, data));
            }
        }
    }

    let manifest_bytes = manifest_bytes
        .ok_or_else(|| Error::Verification(format!("Missing {MANIFEST_ENTRY}")))?;
    let signature =
        signature.ok_or_else(|| Error::Verification(format!("Missing {SIGNATURE_ENTRY}")))?;

    let manifest = SerializedManifest::parse(&manifest_bytes)
        .map_err(|e| Error::Verification(format!("Unreadable manifest: {e}")))?;
    let digest_algorithm = infer_algorithm(&manifest)?;

    let listed: BTreeSet<String> = manifest.keys().cloned().collect();
    if let Some(missing) = assets.difference(&listed).next() {
        return Err(Error::Verification(format!(
            "Entry '{missing}' is not listed in the manifest"
        )));
    }
    if let Some(extra) = listed.difference(&assets).next() {
        return Err(Error::Verification(format!(
            "Manifest lists '{extra}' but the archive has no such entry"
        )));
    }

    for (name, data) in &contents {
        let actual = hash_bytes(digest_algorithm, data);
        if manifest.get(name) != Some(&actual) {
            return Err(Error::Verification(format!("Digest mismatch for '{name}'")));
        }
    }

    let chain_verified = !roots.is_empty();
    verify_signature(&signature, &manifest_bytes, chain, roots)?;
    debug!(assets = assets.len(), chain_verified, "pass verified");

    Ok(VerifiedPass {
        manifest,
        manifest_bytes,
        digest_algorithm,
        chain_verified,
    })
}

fn set_once(slot: &mut Option<Vec<u8>>, name: &str, data: Vec<u8>) -> Result<()> {
    if slot.replace(data).is_some() {
        return Err(Error::Verification(format!("Duplicate entry: {name}")));
    }
    Ok(())
}

fn infer_algorithm(manifest: &Manifest) -> Result<DigestAlgorithm> {
    let mut algorithm = None;
    for (name, digest) in manifest {
        let this = match digest.len() {
            64 => DigestAlgorithm::Sha256,
            40 => DigestAlgorithm::Sha1,
            _ => {
                return Err(Error::Verification(format!(
                    "Digest for '{name}' has unexpected length {}",
                    digest.len()
                )))
            }
        };
        if !digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(Error::Verification(format!(
                "Digest for '{name}' is not lowercase hex"
            )));
        }
        match algorithm {
            None => algorithm = Some(this),
            Some(seen) if seen != this => {
                return Err(Error::Verification("Manifest mixes digest algorithms".into()))
            }
            Some(_) => {}
        }
    }
    Ok(algorithm.unwrap_or_default())
}

fn verify_signature(
    signature: &[u8],
    manifest: &[u8],
    chain: Option<&TrustChain>,
    roots: &[X509],
) -> Result<()> {
    let mut cms = CmsContentInfo::from_der(signature)
        .map_err(|e| Error::Verification(format!("Signature is not DER CMS: {e}")))?;

    let untrusted: Option<Stack<X509>> = chain.map(TrustChain::to_stack).transpose()?;
    let store: Option<X509Store> = if roots.is_empty() {
        None
    } else {
        Some(trust_store(roots)?)
    };

    let mut flags = CMSOptions::BINARY;
    if store.is_none() {
        flags |= CMSOptions::NOVERIFY;
    }

    let untrusted_ref: Option<&StackRef<X509>> = untrusted.as_deref();
    let store_ref: Option<&X509StoreRef> = store.as_deref();

    cms.verify(untrusted_ref, store_ref, Some(manifest), None, flags)
        .map_err(|e| Error::Verification(format!("Signature does not verify: {e}")))
}

fn trust_store(roots: &[X509]) -> Result<X509Store> {
    let mut builder = X509StoreBuilder::new()
        .map_err(|e| Error::Verification(format!("Failed to create trust store: {e}")))?;
    for root in roots {
        builder
            .add_cert(root.clone())
            .map_err(|e| Error::Verification(format!("Failed to add trusted root: {e}")))?;
    }
    Ok(builder.build())
}
