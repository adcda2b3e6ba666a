//! Signing through the linked OpenSSL library.
//!
//! This is the preferred engine: the credential bundle is parsed in memory,
//! so no key material is ever written to scratch space, and no external
//! process is involved.

use super::{SigningEngine, TrustChain};
use crate::pass::ScratchSpace;
use crate::{Error, Result};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::stack::StackRef;
use openssl::x509::{X509Ref, X509};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Certificate and private key unlocked from a PKCS#12 bundle.
///
/// # Security
///
/// The private key is sensitive. Avoid logging or exposing
/// [`NativeIdentity`] instances.
pub struct NativeIdentity {
    /// Pass Type ID certificate.
    pub certificate: X509,
    /// Private key matching the certificate.
    pub private_key: PKey<Private>,
    /// Team ID from the certificate's Organizational Unit field.
    pub team_id: Option<String>,
    /// Pass type identifier from the certificate's UID field.
    pub pass_type_id: Option<String>,
}

impl NativeIdentity {
    /// Unlocks a PKCS#12 bundle held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if the data is not PKCS#12, lacks a
    /// certificate or key, uses an unsupported cipher, or the key does not
    /// match the certificate. Returns [`Error::InvalidPassword`] if the
    /// passphrase does not unlock the bundle.
    pub fn from_p12(p12_data: &[u8], passphrase: &SecretString) -> Result<Self> {
        let pkcs12 = Pkcs12::from_der(p12_data)
            .map_err(|e| Error::Credential(format!("Invalid PKCS#12: {e}")))?;

        let parsed = pkcs12
            .parse2(passphrase.expose_secret())
            .map_err(|e| classify_unlock_error(&e))?;

        let certificate = parsed
            .cert
            .ok_or_else(|| Error::Credential("No certificate in PKCS#12".into()))?;
        let private_key = parsed
            .pkey
            .ok_or_else(|| Error::Credential("No private key in PKCS#12".into()))?;

        validate_key_pair(&certificate, &private_key)?;

        let team_id = subject_entry(&certificate, Nid::ORGANIZATIONALUNITNAME);
        let pass_type_id = subject_entry(&certificate, Nid::USERID);

        Ok(Self {
            certificate,
            private_key,
            team_id,
            pass_type_id,
        })
    }
}

/// Engine backed by the `openssl` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl NativeEngine {
    /// Creates the engine.
    pub fn new() -> Self {
        Self
    }
}

impl SigningEngine for NativeEngine {
    type Identity = NativeIdentity;

    fn name(&self) -> &'static str {
        "native"
    }

    fn derive_identity(
        &self,
        _scratch: &ScratchSpace,
        credential: &Path,
        passphrase: &SecretString,
    ) -> Result<NativeIdentity> {
        let data = fs::read(credential).map_err(|e| {
            Error::ScratchSpace(format!("Failed to read staged credential: {e}"))
        })?;
        let identity = NativeIdentity::from_p12(&data, passphrase)?;
        debug!(
            team_id = identity.team_id.as_deref().unwrap_or("-"),
            pass_type_id = identity.pass_type_id.as_deref().unwrap_or("-"),
            "unlocked signing identity"
        );
        Ok(identity)
    }

    fn sign_detached(
        &self,
        _scratch: &ScratchSpace,
        manifest: &Path,
        identity: &NativeIdentity,
        chain: &TrustChain,
    ) -> Result<Vec<u8>> {
        let data = fs::read(manifest)
            .map_err(|e| Error::ScratchSpace(format!("Failed to read manifest: {e}")))?;
        sign_bytes(&data, identity, chain)
    }
}

/// Produces DER detached CMS over `data`.
///
/// A chain that also lists the signer certificate is accepted; the signer is
/// embedded once.
pub fn sign_bytes(data: &[u8], identity: &NativeIdentity, chain: &TrustChain) -> Result<Vec<u8>> {
    let cert: &X509Ref = &identity.certificate;
    let stack = chain.to_stack_excluding(cert)?;
    let certs: &StackRef<X509> = &stack;
    let key: &PKeyRef<Private> = &identity.private_key;

    let cms = CmsContentInfo::sign(
        Some(cert),
        Some(key),
        Some(certs),
        Some(data),
        CMSOptions::DETACHED | CMSOptions::BINARY,
    )
    .map_err(|e| Error::SigningEngine(format!("Failed to build CMS signature: {e}")))?;

    cms.to_der()
        .map_err(|e| Error::SigningEngine(format!("Failed to encode CMS signature: {e}")))
}

fn classify_unlock_error(err: &ErrorStack) -> Error {
    let unsupported = err.errors().iter().any(|e| {
        e.reason()
            .is_some_and(|r| r.to_ascii_lowercase().contains("unsupported"))
    });
    if unsupported {
        Error::Credential(format!(
            "PKCS#12 uses an unsupported cipher (try the openssl engine with --legacy): {err}"
        ))
    } else {
        Error::InvalidPassword
    }
}

/// Validate that the private key matches the certificate's public key
fn validate_key_pair(cert: &X509, private_key: &PKey<Private>) -> Result<()> {
    let cert_public_key = cert.public_key().map_err(|e| {
        Error::Credential(format!("Failed to extract public key from certificate: {e}"))
    })?;

    if !private_key.public_eq(&cert_public_key) {
        return Err(Error::Credential(
            "Private key does not match certificate public key".into(),
        ));
    }

    Ok(())
}

fn subject_entry(cert: &X509, nid: Nid) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|data| data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn generate_test_ec_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn generate_test_cert(private_key: &PKey<Private>) -> X509 {
        let mut name_builder = X509NameBuilder::new().unwrap();
        name_builder.append_entry_by_text("CN", "Pass Type ID: pass.com.example").unwrap();
        name_builder.append_entry_by_text("OU", "TEAM123456").unwrap();
        name_builder.append_entry_by_text("UID", "pass.com.example").unwrap();
        let name = name_builder.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap();
        builder.set_serial_number(&serial.to_asn1_integer().unwrap()).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(private_key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
        builder.sign(private_key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn p12(key: &PKey<Private>, cert: &X509, pass: &str) -> Vec<u8> {
        let mut builder = Pkcs12::builder();
        builder.name("pass").pkey(key).cert(cert);
        builder.build2(pass).unwrap().to_der().unwrap()
    }

    #[test]
    fn test_from_p12_extracts_identity() {
        let key = generate_test_ec_key();
        let cert = generate_test_cert(&key);
        let data = p12(&key, &cert, "p");

        let identity = NativeIdentity::from_p12(&data, &SecretString::new("p".into())).unwrap();
        assert_eq!(identity.team_id.as_deref(), Some("TEAM123456"));
        assert_eq!(identity.pass_type_id.as_deref(), Some("pass.com.example"));
        assert_eq!(
            identity.certificate.to_der().unwrap(),
            cert.to_der().unwrap()
        );
    }

    #[test]
    fn test_from_p12_wrong_password() {
        let key = generate_test_ec_key();
        let cert = generate_test_cert(&key);
        let data = p12(&key, &cert, "p");

        let result = NativeIdentity::from_p12(&data, &SecretString::new("nope".into()));
        assert!(matches!(result, Err(Error::InvalidPassword)));
    }

    #[test]
    fn test_from_p12_invalid_data() {
        let result = NativeIdentity::from_p12(b"not valid p12 data", &SecretString::new(String::new()));
        assert!(matches!(result, Err(Error::Credential(_))));
    }

    #[test]
    fn test_validate_key_pair_mismatched() {
        let key1 = generate_test_ec_key();
        let key2 = generate_test_ec_key();
        let certificate = generate_test_cert(&key1);

        let err = validate_key_pair(&certificate, &key2).unwrap_err();
        assert!(err.to_string().contains("does not match"));
        assert!(validate_key_pair(&certificate, &key1).is_ok());
    }

    #[test]
    fn test_sign_bytes_produces_detached_cms() {
        let key = generate_test_ec_key();
        let cert = generate_test_cert(&key);
        let identity = NativeIdentity {
            certificate: cert.clone(),
            private_key: key,
            team_id: None,
            pass_type_id: None,
        };
        let chain = TrustChain::from_certificates(vec![cert]).unwrap();

        let der = sign_bytes(br#"{"pass.json":"00"}"#, &identity, &chain).unwrap();
        assert_eq!(der[0], 0x30);

        let mut cms = CmsContentInfo::from_der(&der).unwrap();
        cms.verify(
            None,
            None,
            Some(&br#"{"pass.json":"00"}"#[..]),
            None,
            CMSOptions::BINARY | CMSOptions::NOVERIFY,
        )
        .unwrap();

        let tampered = cms.verify(
            None,
            None,
            Some(&br#"{"pass.json":"01"}"#[..]),
            None,
            CMSOptions::BINARY | CMSOptions::NOVERIFY,
        );
        assert!(tampered.is_err());
    }
}
