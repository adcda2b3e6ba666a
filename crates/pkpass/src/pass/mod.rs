//! Pass building workflow.
//!
//! [`PassSigner`] drives one build from a pass directory and a credential
//! bundle to finished archive bytes:
//!
//! 1. Create scratch space and stage the credential bundle
//! 2. Unlock the bundle into a signing identity
//! 3. Digest and stream every asset, then write the manifest to scratch space
//!    and into the archive
//! 4. Sign the manifest
//! 5. Append the signature and finish the archive
//!
//! The archive is assembled in memory and only returned once every step has
//! succeeded. Scratch space is removed on every exit path.

pub mod archive;
pub mod scratch;
pub mod verify;

pub use archive::{
    ArchiveComposer, CompressionLevel, EntryWriter, RESERVED_ENTRIES, SIGNATURE_ENTRY,
};
pub use scratch::ScratchSpace;
pub use verify::{verify_pass, VerifiedPass};

use crate::bundle::manifest::MANIFEST_ENTRY;
use crate::bundle::{digest_asset, list_assets, DigestAlgorithm, ManifestBuilder, SerializedManifest};
use crate::crypto::{SigningEngine, TrustChain};
use crate::{Error, Result};
use secrecy::SecretString;
use std::fmt;
use std::fs;
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of a single build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Nothing done yet.
    Init,
    /// Scratch space exists and holds the credential bundle.
    CredentialStaged,
    /// Certificate and key are usable.
    Unlocked,
    /// Every asset is packaged and the manifest is written to both sinks.
    Bundled,
    /// The manifest signature exists.
    Signed,
    /// The archive is complete.
    Finalized,
    /// A step failed; terminal.
    Failed,
}

impl BuildState {
    /// The state a successful step moves to, or `None` for terminal states.
    pub fn next(self) -> Option<BuildState> {
        match self {
            BuildState::Init => Some(BuildState::CredentialStaged),
            BuildState::CredentialStaged => Some(BuildState::Unlocked),
            BuildState::Unlocked => Some(BuildState::Bundled),
            BuildState::Bundled => Some(BuildState::Signed),
            BuildState::Signed => Some(BuildState::Finalized),
            BuildState::Finalized | BuildState::Failed => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Init => "init",
            BuildState::CredentialStaged => "credential-staged",
            BuildState::Unlocked => "unlocked",
            BuildState::Bundled => "bundled",
            BuildState::Signed => "signed",
            BuildState::Finalized => "finalized",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Progress {
    state: BuildState,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: BuildState::Init,
        }
    }

    fn advance(&mut self, to: BuildState) {
        debug_assert_eq!(self.state.next(), Some(to), "invalid build transition");
        debug!(from = %self.state, to = %to, "build state");
        self.state = to;
    }

    /// Moves to [`BuildState::Failed`] and returns the state the failure
    /// happened in.
    fn fail(&mut self) -> BuildState {
        let from = self.state;
        debug_assert!(!from.is_terminal(), "invalid build transition");
        debug!(from = %from, to = %BuildState::Failed, "build state");
        self.state = BuildState::Failed;
        from
    }
}

/// Pass building workflow over a [`SigningEngine`].
pub struct PassSigner<E: SigningEngine> {
    engine: E,
    trust_chain: Arc<TrustChain>,
    digest_algorithm: DigestAlgorithm,
    compression_level: CompressionLevel,
    scratch_root: Option<PathBuf>,
    exclusions: Vec<String>,
}

impl<E: SigningEngine> PassSigner<E> {
    /// Creates a signer that embeds `trust_chain` in every signature.
    pub fn new(engine: E, trust_chain: Arc<TrustChain>) -> Self {
        Self {
            engine,
            trust_chain,
            digest_algorithm: DigestAlgorithm::default(),
            compression_level: CompressionLevel::DEFAULT,
            scratch_root: None,
            exclusions: Vec::new(),
        }
    }

    /// Set the manifest digest algorithm.
    pub fn digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set the compression level for the output archive.
    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Create scratch space under `root` instead of the system temp directory.
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Leave out pass directory files whose name starts with `pattern`.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    /// Builds a pass and returns the archive bytes.
    ///
    /// # Arguments
    ///
    /// * `pass_dir` - Directory holding `pass.json`, images and other assets
    /// * `credential` - PKCS#12 bundle with the Pass Type ID certificate and key
    /// * `passphrase` - Passphrase of the bundle (may be empty)
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step. No archive bytes are
    /// returned in that case and scratch space has already been removed.
    pub fn sign(
        &self,
        pass_dir: impl AsRef<Path>,
        credential: &[u8],
        passphrase: &SecretString,
    ) -> Result<Vec<u8>> {
        let pass_dir = pass_dir.as_ref();
        info!(
            pass_dir = %pass_dir.display(),
            engine = self.engine.name(),
            digest = %self.digest_algorithm,
            "building pass"
        );

        let mut progress = Progress::new();
        match self.run(&mut progress, pass_dir, credential, passphrase) {
            Ok(bytes) => {
                info!(size = bytes.len(), "pass finalized");
                Ok(bytes)
            }
            Err(e) => {
                let failed_in = progress.fail();
                warn!(
                    %failed_in,
                    state = %progress.state,
                    stage = %e.stage(),
                    error = %e,
                    "pass build failed"
                );
                Err(e)
            }
        }
    }

    /// Builds a pass and writes it to `output`.
    ///
    /// The file is only created after the build succeeded.
    pub fn sign_to(
        &self,
        pass_dir: impl AsRef<Path>,
        credential: &[u8],
        passphrase: &SecretString,
        output: impl AsRef<Path>,
    ) -> Result<()> {
        let bytes = self.sign(pass_dir, credential, passphrase)?;
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(output, bytes)?;
        Ok(())
    }

    fn run(
        &self,
        progress: &mut Progress,
        pass_dir: &Path,
        credential: &[u8],
        passphrase: &SecretString,
    ) -> Result<Vec<u8>> {
        let scratch = match &self.scratch_root {
            Some(root) => ScratchSpace::new_in(root)?,
            None => ScratchSpace::new()?,
        };
        let credential_path = scratch.stage_credential(credential)?;
        progress.advance(BuildState::CredentialStaged);

        let identity = self
            .engine
            .derive_identity(&scratch, &credential_path, passphrase)?;
        progress.advance(BuildState::Unlocked);

        let mut composer = ArchiveComposer::new(Cursor::new(Vec::new()), self.compression_level);
        let manifest = self.bundle(&mut composer, pass_dir)?;
        let manifest_path = scratch.write_private(MANIFEST_ENTRY, manifest.as_bytes())?;
        composer.write_manifest(&manifest)?;
        progress.advance(BuildState::Bundled);

        if scratch.read(MANIFEST_ENTRY)? != manifest.as_bytes() {
            return Err(Error::ScratchSpace(
                "Manifest in scratch space differs from the packaged manifest".into(),
            ));
        }
        let signature = self.engine.sign_detached(
            &scratch,
            &manifest_path,
            &identity,
            &self.trust_chain,
        )?;
        progress.advance(BuildState::Signed);

        composer.write_signature(&signature)?;
        let bytes = composer.finish()?.into_inner();

        drop(identity);
        scratch.close()?;
        progress.advance(BuildState::Finalized);

        Ok(bytes)
    }

    fn bundle<W: Write + Seek>(
        &self,
        composer: &mut ArchiveComposer<W>,
        pass_dir: &Path,
    ) -> Result<SerializedManifest> {
        let assets = list_assets(pass_dir, &self.exclusions)?;
        if let Some(asset) = assets
            .iter()
            .find(|a| RESERVED_ENTRIES.contains(&a.name.as_str()))
        {
            return Err(Error::Archive(format!(
                "Pass directory contains '{}', which is generated during signing; remove it",
                asset.name
            )));
        }

        let mut manifest = ManifestBuilder::new();
        for asset in &assets {
            manifest.insert(digest_asset(composer, asset, self.digest_algorithm)?)?;
        }
        debug!(assets = manifest.len(), "manifest complete");

        manifest.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_sequence() {
        let mut state = BuildState::Init;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                BuildState::Init,
                BuildState::CredentialStaged,
                BuildState::Unlocked,
                BuildState::Bundled,
                BuildState::Signed,
                BuildState::Finalized,
            ]
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(BuildState::Finalized.is_terminal());
        assert!(BuildState::Failed.is_terminal());
        assert!(!BuildState::Init.is_terminal());
        assert!(!BuildState::Signed.is_terminal());
    }

    #[test]
    fn test_progress_advances() {
        let mut progress = Progress::new();
        progress.advance(BuildState::CredentialStaged);
        progress.advance(BuildState::Unlocked);
        assert_eq!(progress.state, BuildState::Unlocked);
    }

    #[test]
    fn test_progress_fail_reports_failing_state() {
        let mut progress = Progress::new();
        progress.advance(BuildState::CredentialStaged);
        assert_eq!(progress.fail(), BuildState::CredentialStaged);
        assert_eq!(progress.state, BuildState::Failed);
        assert!(progress.state.is_terminal());
    }

    #[test]
    #[should_panic(expected = "invalid build transition")]
    #[cfg(debug_assertions)]
    fn test_progress_rejects_skipped_state() {
        let mut progress = Progress::new();
        progress.advance(BuildState::Signed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BuildState::CredentialStaged.to_string(), "credential-staged");
        assert_eq!(BuildState::Failed.to_string(), "failed");
    }
}
