//! PassBuilder API
//!
//! Provides a builder pattern interface for building signed passes from a
//! pass directory and a PKCS#12 credential bundle.

use crate::bundle::DigestAlgorithm;
use crate::crypto::{trust, NativeEngine, OpensslCli, SigningEngine, TrustChain};
use crate::pass::{CompressionLevel, PassSigner};
use crate::{Error, Result};
use secrecy::SecretString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which cryptographic engine signs the manifest.
#[derive(Debug, Clone, Default)]
pub enum Engine {
    /// Linked OpenSSL library.
    #[default]
    Native,
    /// The `openssl` command-line tool.
    OpensslCli(OpensslCli),
}

/// Pass building tool with builder pattern API.
///
/// # Example
///
/// ```ignore
/// use pkpass::PassBuilder;
///
/// PassBuilder::new()
///     .pkcs12("Certificates.p12")
///     .password("secret")
///     .trust_chain_file("AppleWWDRCAG4.cer")?
///     .build_to("Coupon.pass", "Coupon.pkpass")?;
/// ```
pub struct PassBuilder {
    pkcs12: Option<PathBuf>,
    pkcs12_data: Option<Vec<u8>>,
    password: Option<SecretString>,
    engine: Engine,
    trust_chain: Option<Arc<TrustChain>>,
    digest_algorithm: DigestAlgorithm,
    compression_level: CompressionLevel,
    scratch_root: Option<PathBuf>,
    exclusions: Vec<String>,
}

impl PassBuilder {
    /// Create a new PassBuilder.
    pub fn new() -> Self {
        Self {
            pkcs12: None,
            pkcs12_data: None,
            password: None,
            engine: Engine::Native,
            trust_chain: None,
            digest_algorithm: DigestAlgorithm::default(),
            compression_level: CompressionLevel::DEFAULT,
            scratch_root: None,
            exclusions: Vec::new(),
        }
    }

    /// Set PKCS#12 file path (.p12 format).
    pub fn pkcs12(mut self, path: impl AsRef<Path>) -> Self {
        self.pkcs12 = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set PKCS#12 bundle bytes.
    pub fn pkcs12_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.pkcs12_data = Some(data.into());
        self
    }

    /// Read the PKCS#12 bundle from any reader.
    pub fn pkcs12_reader(mut self, mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::Credential(format!("Failed to read PKCS#12: {e}")))?;
        self.pkcs12_data = Some(data);
        Ok(self)
    }

    /// Set password for the PKCS#12 bundle.
    ///
    /// The password is stored securely and will be zeroized when dropped.
    /// Defaults to the empty password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Select the signing engine.
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Embed `chain` instead of the process-wide trust chain.
    pub fn trust_chain(mut self, chain: impl Into<Arc<TrustChain>>) -> Self {
        self.trust_chain = Some(chain.into());
        self
    }

    /// Load the trust chain from a PEM or DER file.
    pub fn trust_chain_file(self, path: impl AsRef<Path>) -> Result<Self> {
        Ok(self.trust_chain(TrustChain::from_file(path)?))
    }

    /// Set the manifest digest algorithm.
    pub fn digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set ZIP compression level for the output (0-9).
    ///
    /// 0 = no compression (fastest), 9 = maximum compression (smallest).
    /// Default is 6 (balanced).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = CompressionLevel::new(level);
        self
    }

    /// Create scratch space under `root`.
    pub fn scratch_root(mut self, root: impl AsRef<Path>) -> Self {
        self.scratch_root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Leave out pass directory files whose name starts with `pattern`.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if:
    /// - Both a PKCS#12 path and PKCS#12 bytes are specified
    /// - Neither is specified
    /// - No trust chain is configured or installed process-wide
    pub fn validate(&self) -> Result<()> {
        match (&self.pkcs12, &self.pkcs12_data) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "Cannot specify both a PKCS#12 path and PKCS#12 data".into(),
                ))
            }
            (None, None) => {
                return Err(Error::Config(
                    "Must specify a PKCS#12 credential bundle".into(),
                ))
            }
            _ => {}
        }

        if self.resolve_trust_chain().is_none() {
            return Err(Error::Config(
                "No trust chain configured; set one or install it process-wide".into(),
            ));
        }

        Ok(())
    }

    /// Build the pass and return the archive bytes.
    pub fn build(&self, pass_dir: impl AsRef<Path>) -> Result<Vec<u8>> {
        self.validate()?;
        let credential = self.load_credential()?;
        let chain = self
            .resolve_trust_chain()
            .ok_or_else(|| Error::Config("No trust chain configured".into()))?;
        let empty = SecretString::new(String::new());
        let password = self.password.as_ref().unwrap_or(&empty);

        match &self.engine {
            Engine::Native => {
                self.configure(PassSigner::new(NativeEngine::new(), chain))
                    .sign(pass_dir, &credential, password)
            }
            Engine::OpensslCli(cli) => {
                self.configure(PassSigner::new(cli.clone(), chain))
                    .sign(pass_dir, &credential, password)
            }
        }
    }

    /// Build the pass and write it to `output`.
    ///
    /// Nothing is written if the build fails.
    pub fn build_to(&self, pass_dir: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        let bytes = self.build(pass_dir)?;
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(output, bytes)?;
        Ok(())
    }

    fn configure<E: SigningEngine>(&self, signer: PassSigner<E>) -> PassSigner<E> {
        let mut signer = signer
            .digest_algorithm(self.digest_algorithm)
            .compression_level(self.compression_level);
        if let Some(ref root) = self.scratch_root {
            signer = signer.scratch_root(root);
        }
        for pattern in &self.exclusions {
            signer = signer.exclude(pattern.clone());
        }
        signer
    }

    fn load_credential(&self) -> Result<Vec<u8>> {
        if let Some(ref data) = self.pkcs12_data {
            return Ok(data.clone());
        }
        let path = self
            .pkcs12
            .as_ref()
            .ok_or_else(|| Error::Config("No PKCS#12 configured".into()))?;
        fs::read(path)
            .map_err(|e| Error::Credential(format!("Failed to read {}: {e}", path.display())))
    }

    fn resolve_trust_chain(&self) -> Option<Arc<TrustChain>> {
        self.trust_chain.clone().or_else(trust::installed)
    }
}

impl Default for PassBuilder {
    fn default() -> Self {
        Self::new()
    }
}
