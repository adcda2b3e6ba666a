//! Signing engine abstraction.
//!
//! The pipeline needs two capabilities from a cryptographic backend:
//! unlocking a PKCS#12 credential bundle into a usable identity, and producing
//! a detached CMS signature over the manifest file. [`SigningEngine`] captures
//! exactly that so the linked OpenSSL library and the `openssl` command-line
//! tool are interchangeable.

use super::TrustChain;
use crate::pass::ScratchSpace;
use crate::Result;
use secrecy::SecretString;
use std::path::Path;

/// Cryptographic backend used by [`crate::pass::PassSigner`].
pub trait SigningEngine {
    /// Unlocked certificate and private key, in whatever form the engine needs.
    type Identity;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Unlocks the staged credential bundle at `credential` with `passphrase`.
    ///
    /// Anything the engine extracts must be written inside `scratch`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidPassword`] for a wrong passphrase,
    /// [`crate::Error::Credential`] for a malformed bundle, and a signing
    /// engine error if the backend itself fails.
    fn derive_identity(
        &self,
        scratch: &ScratchSpace,
        credential: &Path,
        passphrase: &SecretString,
    ) -> Result<Self::Identity>;

    /// Signs the file at `manifest` and returns DER-encoded detached CMS.
    ///
    /// The signature embeds the signer certificate and every certificate of
    /// `chain`.
    fn sign_detached(
        &self,
        scratch: &ScratchSpace,
        manifest: &Path,
        identity: &Self::Identity,
        chain: &TrustChain,
    ) -> Result<Vec<u8>>;
}
