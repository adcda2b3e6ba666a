//! Issuer trust chain.
//!
//! Passes embed the issuer's intermediate certificate (Apple WWDR) in the
//! signature so devices can validate it without a lookup. The chain is
//! process-wide configuration: load it once at startup with [`install`] and
//! every build reads it through [`installed`]. If nothing was installed,
//! [`installed`] falls back to [`EMBEDDED_CHAIN_PEM`].

use crate::{Error, Result};
use openssl::stack::Stack;
use openssl::x509::{X509Ref, X509};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::warn;

static INSTALLED: OnceLock<Arc<TrustChain>> = OnceLock::new();

/// PEM of the issuer chain compiled into the binary, if any.
///
/// Point this at the certificate, e.g.
/// `Some(include_bytes!("AppleWWDRCAG4.pem"))`, to make builds work without
/// calling [`install`].
pub const EMBEDDED_CHAIN_PEM: Option<&[u8]> = None;

/// Intermediate certificates embedded in every signature.
#[derive(Clone)]
pub struct TrustChain {
    certificates: Vec<X509>,
}

impl TrustChain {
    /// Parses one or more PEM certificates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the data holds no parsable certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certificates = X509::stack_from_pem(pem)
            .map_err(|e| Error::Config(format!("Failed to parse trust chain PEM: {e}")))?;
        if certificates.is_empty() {
            return Err(Error::Config("Trust chain contains no certificates".into()));
        }
        Ok(Self { certificates })
    }

    /// Parses a single DER certificate, the format Apple distributes.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let certificate = X509::from_der(der)
            .map_err(|e| Error::Config(format!("Failed to parse trust chain DER: {e}")))?;
        Ok(Self {
            certificates: vec![certificate],
        })
    }

    /// Reads a PEM or DER certificate file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            Error::Config(format!("Failed to read trust chain {}: {e}", path.display()))
        })?;
        Self::from_pem(&data).or_else(|_| Self::from_der(&data))
    }

    /// Wraps already parsed certificates.
    pub fn from_certificates(certificates: Vec<X509>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(Error::Config("Trust chain contains no certificates".into()));
        }
        Ok(Self { certificates })
    }

    /// The certificates in chain order.
    pub fn certificates(&self) -> &[X509] {
        &self.certificates
    }

    /// Builds an OpenSSL certificate stack for CMS signing.
    pub fn to_stack(&self) -> Result<Stack<X509>> {
        self.stack_without(None)
    }

    /// Like [`TrustChain::to_stack`], but leaves out every copy of `signer`.
    ///
    /// OpenSSL refuses to add a certificate to a CMS structure twice, and the
    /// signer certificate is always added on its own.
    pub fn to_stack_excluding(&self, signer: &X509Ref) -> Result<Stack<X509>> {
        let signer = signer
            .to_der()
            .map_err(|e| Error::Credential(format!("Failed to encode signer certificate: {e}")))?;
        self.stack_without(Some(&signer))
    }

    fn stack_without(&self, excluded: Option<&[u8]>) -> Result<Stack<X509>> {
        let mut stack = Stack::new()
            .map_err(|e| Error::SigningEngine(format!("Failed to allocate certificate stack: {e}")))?;
        for cert in &self.certificates {
            if let Some(excluded) = excluded {
                let der = cert.to_der().map_err(|e| {
                    Error::Config(format!("Failed to encode chain certificate: {e}"))
                })?;
                if der == excluded {
                    continue;
                }
            }
            stack
                .push(cert.clone())
                .map_err(|e| Error::SigningEngine(format!("Failed to add chain certificate: {e}")))?;
        }
        Ok(stack)
    }

    /// Concatenated PEM encoding, as passed to `openssl smime -certfile`.
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        let mut pem = Vec::new();
        for cert in &self.certificates {
            let encoded = cert
                .to_pem()
                .map_err(|e| Error::SigningEngine(format!("Failed to encode chain certificate: {e}")))?;
            pem.extend_from_slice(&encoded);
        }
        Ok(pem)
    }
}

/// Installs the process-wide trust chain.
///
/// # Errors
///
/// Returns [`Error::Config`] if a chain was already installed; the installed
/// chain never changes for the life of the process.
pub fn install(chain: TrustChain) -> Result<Arc<TrustChain>> {
    let chain = Arc::new(chain);
    INSTALLED
        .set(Arc::clone(&chain))
        .map_err(|_| Error::Config("Trust chain is already installed".into()))?;
    Ok(chain)
}

/// Returns the process-wide trust chain.
///
/// On first use without a prior [`install`], the embedded chain (if any) is
/// installed and returned.
pub fn installed() -> Option<Arc<TrustChain>> {
    if let Some(chain) = INSTALLED.get() {
        return Some(Arc::clone(chain));
    }
    let chain = match embedded(EMBEDDED_CHAIN_PEM) {
        Ok(chain) => chain?,
        Err(e) => {
            warn!(error = %e, "embedded trust chain is unusable");
            return None;
        }
    };
    Some(Arc::clone(INSTALLED.get_or_init(|| Arc::new(chain))))
}

fn embedded(pem: Option<&[u8]>) -> Result<Option<TrustChain>> {
    pem.map(TrustChain::from_pem).transpose()
}
