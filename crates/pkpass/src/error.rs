//! Error types for pass building.
//!
//! This module defines the [`enum@Error`] enum covering every way a build can
//! fail, grouped by the pipeline stage that produced it. Every variant is fatal
//! to the current build; nothing is retried automatically.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::fmt;
use thiserror::Error;

/// Error type for pass building and verification.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants to handle specific failure cases, or use [`Error::stage`] and
/// [`Error::is_input_error`] to decide whether to fix the inputs or the environment.
///
/// # Examples
///
/// ```no_run
/// use pkpass::{PassBuilder, Error};
///
/// let result = PassBuilder::new()
///     .pkcs12("Certificates.p12")
///     .password("secret")
///     .build("Coupon.pass");
/// match result {
///     Ok(bytes) => println!("Built {} bytes", bytes.len()),
///     Err(Error::InvalidPassword) => eprintln!("Wrong certificate password"),
///     Err(Error::EngineUnavailable(msg)) => eprintln!("Install OpenSSL: {msg}"),
///     Err(e) => eprintln!("Build failed during {}: {e}", e.stage()),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed outside a specific asset.
    ///
    /// Occurs when the output file cannot be written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Scratch space could not be created, written, or removed.
    #[error("Scratch space error: {0}")]
    ScratchSpace(String),

    /// The credential bundle is malformed or unusable.
    ///
    /// The PKCS#12 data could not be parsed, is missing its certificate or
    /// private key, or the key does not match the certificate.
    #[error("Invalid credential bundle: {0}")]
    Credential(String),

    /// Incorrect passphrase for the PKCS#12 bundle.
    #[error("Invalid password for PKCS#12 credential bundle")]
    InvalidPassword,

    /// Reading a named asset, or listing the pass directory itself, failed.
    ///
    /// For a missing or non-directory pass directory, `name` is the
    /// directory path.
    #[error("Failed to read asset '{name}': {source}")]
    AssetRead {
        /// Asset file name inside the pass directory.
        name: String,
        /// Underlying filesystem error.
        source: std::io::Error,
    },

    /// The manifest could not be encoded.
    #[error("Manifest serialization failed: {0}")]
    Serialization(String),

    /// The cryptographic engine failed while signing or unlocking.
    ///
    /// Covers non-zero exits, timeouts and unexpected output of the external
    /// `openssl` tool as well as failures reported by the linked library.
    #[error("Signing failed: {0}")]
    SigningEngine(String),

    /// The cryptographic engine could not be started at all.
    #[error("Signing engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The output container rejected a write or could not be finalized.
    #[error("Archive error: {0}")]
    Archive(String),

    /// ZIP encoding failed.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Invalid builder configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A pass archive failed verification.
    #[error("Verification failed: {0}")]
    Verification(String),
}

/// Pipeline stage an [`enum@Error`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Creating, writing or removing scratch space.
    ScratchSpace,
    /// Unlocking the credential bundle.
    CredentialUnlock,
    /// Digesting and streaming assets.
    Digesting,
    /// Serializing the manifest.
    ManifestSerialization,
    /// Computing the detached signature.
    Signing,
    /// Writing or finalizing the container.
    ArchiveFinalize,
    /// Validating configuration before a build starts.
    Configuration,
    /// Verifying an existing archive.
    Verification,
    /// Filesystem access not tied to one stage.
    Filesystem,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ScratchSpace => "scratch space",
            Stage::CredentialUnlock => "credential unlock",
            Stage::Digesting => "digesting",
            Stage::ManifestSerialization => "manifest serialization",
            Stage::Signing => "signing",
            Stage::ArchiveFinalize => "archive finalize",
            Stage::Configuration => "configuration",
            Stage::Verification => "verification",
            Stage::Filesystem => "filesystem",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Builds an [`Error::AssetRead`] for the named asset.
    pub fn asset_read(name: impl Into<String>, source: std::io::Error) -> Self {
        Error::AssetRead {
            name: name.into(),
            source,
        }
    }

    /// Returns the stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Error::Io(_) => Stage::Filesystem,
            Error::ScratchSpace(_) => Stage::ScratchSpace,
            Error::Credential(_) | Error::InvalidPassword => Stage::CredentialUnlock,
            Error::AssetRead { .. } => Stage::Digesting,
            Error::Serialization(_) => Stage::ManifestSerialization,
            Error::SigningEngine(_) | Error::EngineUnavailable(_) => Stage::Signing,
            Error::Archive(_) | Error::Zip(_) => Stage::ArchiveFinalize,
            Error::Config(_) => Stage::Configuration,
            Error::Verification(_) => Stage::Verification,
        }
    }

    /// Whether the caller's inputs caused the failure.
    ///
    /// `true` for bad credentials, unreadable or unencodable assets, asset
    /// names colliding with reserved entries, and misconfiguration. `false`
    /// for environment problems such as a missing or failing signing engine
    /// or an unusable scratch directory.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Credential(_)
                | Error::InvalidPassword
                | Error::AssetRead { .. }
                | Error::Serialization(_)
                | Error::Archive(_)
                | Error::Config(_)
                | Error::Verification(_)
        )
    }
}
