//! Signing through the `openssl` command-line tool.
//!
//! Fallback engine for hosts where the linked library cannot read a bundle
//! (for example RC2-encrypted PKCS#12 files on OpenSSL 3 without the legacy
//! provider). Every step is one `openssl` invocation working on files inside
//! scratch space:
//!
//! 1. `openssl pkcs12 -clcerts -nokeys` extracts `certificate.pem`
//! 2. `openssl pkcs12 -nocerts` extracts `key.pem`, re-encrypted under a fresh
//!    random passphrase
//! 3. `openssl smime -sign -binary -outform der` writes `signature`
//!
//! Passphrases are handed to the child through environment variables
//! (`-passin env:NAME`) so they never appear in a process listing.

use super::{passphrase, SigningEngine, TrustChain};
use crate::pass::ScratchSpace;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default limit for a single `openssl` invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_STDERR_BYTES: u64 = 64 * 1024;

const PASSIN_VAR: &str = "PKPASS_PASSIN";
const PASSOUT_VAR: &str = "PKPASS_PASSOUT";

const CERTIFICATE_FILE: &str = "certificate.pem";
const KEY_FILE: &str = "key.pem";
const CHAIN_FILE: &str = "wwdr.pem";
const SIGNATURE_FILE: &str = "signature";

/// Certificate and encrypted key extracted into scratch space.
pub struct CliIdentity {
    certificate: PathBuf,
    key: PathBuf,
    key_passphrase: SecretString,
}

impl CliIdentity {
    /// Path of the extracted certificate PEM.
    pub fn certificate_path(&self) -> &Path {
        &self.certificate
    }

    /// Path of the extracted, re-encrypted private key PEM.
    pub fn key_path(&self) -> &Path {
        &self.key
    }
}

/// Engine that shells out to `openssl`.
#[derive(Debug, Clone)]
pub struct OpensslCli {
    program: PathBuf,
    timeout: Duration,
    legacy: bool,
}

impl Default for OpensslCli {
    fn default() -> Self {
        Self::new()
    }
}

impl OpensslCli {
    /// Uses `openssl` from `PATH` with the default timeout.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("openssl"),
            timeout: DEFAULT_TIMEOUT,
            legacy: false,
        }
    }

    /// Sets the path of the `openssl` binary.
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the limit for each invocation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Passes `-legacy` to `openssl pkcs12` (OpenSSL 3 reading RC2 bundles).
    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    fn pkcs12_command(&self, credential: &Path, passphrase: &SecretString) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("pkcs12");
        if self.legacy {
            cmd.arg("-legacy");
        }
        cmd.arg("-in")
            .arg(credential)
            .arg("-passin")
            .arg(format!("env:{PASSIN_VAR}"))
            .env(PASSIN_VAR, passphrase.expose_secret());
        cmd
    }

    fn run(&self, step: &str, cmd: &mut Command) -> Result<()> {
        debug!(step, program = %self.program.display(), "running openssl");
        let output = run_with_timeout(cmd, self.timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::EngineUnavailable(format!("{} not found", self.program.display()))
            } else if e.kind() == io::ErrorKind::TimedOut {
                Error::SigningEngine(format!("openssl {step} timed out after {:?}", self.timeout))
            } else {
                Error::EngineUnavailable(format!("Failed to run {}: {e}", self.program.display()))
            }
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if step.starts_with("pkcs12") {
            return Err(classify_pkcs12_failure(stderr, output.status));
        }
        Err(Error::SigningEngine(format!(
            "openssl {step} failed ({}): {stderr}",
            output.status
        )))
    }
}

impl SigningEngine for OpensslCli {
    type Identity = CliIdentity;

    fn name(&self) -> &'static str {
        "openssl-cli"
    }

    fn derive_identity(
        &self,
        scratch: &ScratchSpace,
        credential: &Path,
        passphrase: &SecretString,
    ) -> Result<CliIdentity> {
        let certificate = scratch.file(CERTIFICATE_FILE);
        let mut cmd = self.pkcs12_command(credential, passphrase);
        cmd.args(["-clcerts", "-nokeys", "-out"]).arg(&certificate);
        self.run("pkcs12 certificate", &mut cmd)?;

        let key = scratch.file(KEY_FILE);
        let key_passphrase = passphrase::generate();
        let mut cmd = self.pkcs12_command(credential, passphrase);
        cmd.args(["-nocerts", "-out"])
            .arg(&key)
            .arg("-passout")
            .arg(format!("env:{PASSOUT_VAR}"))
            .env(PASSOUT_VAR, key_passphrase.expose_secret());
        self.run("pkcs12 key", &mut cmd)?;

        let pem = scratch.read(CERTIFICATE_FILE)?;
        if !contains(&pem, b"-----BEGIN CERTIFICATE-----") {
            return Err(Error::Credential("No certificate in PKCS#12".into()));
        }
        let key_pem = scratch.read(KEY_FILE)?;
        if !contains(&key_pem, b"PRIVATE KEY-----") {
            return Err(Error::Credential("No private key in PKCS#12".into()));
        }

        Ok(CliIdentity {
            certificate,
            key,
            key_passphrase,
        })
    }

    fn sign_detached(
        &self,
        scratch: &ScratchSpace,
        manifest: &Path,
        identity: &CliIdentity,
        chain: &TrustChain,
    ) -> Result<Vec<u8>> {
        let chain_file = scratch.write_private(CHAIN_FILE, &chain.to_pem()?)?;
        let signature = scratch.file(SIGNATURE_FILE);

        let mut cmd = Command::new(&self.program);
        cmd.args(["smime", "-sign", "-binary", "-outform", "der"])
            .arg("-signer")
            .arg(&identity.certificate)
            .arg("-inkey")
            .arg(&identity.key)
            .arg("-certfile")
            .arg(&chain_file)
            .arg("-in")
            .arg(manifest)
            .arg("-out")
            .arg(&signature)
            .arg("-passin")
            .arg(format!("env:{PASSIN_VAR}"))
            .env(PASSIN_VAR, identity.key_passphrase.expose_secret());
        self.run("smime", &mut cmd)?;

        let der = scratch.read(SIGNATURE_FILE)?;
        if der.first() != Some(&0x30) {
            return Err(Error::SigningEngine(
                "openssl smime produced output that is not DER".into(),
            ));
        }
        Ok(der)
    }
}

fn classify_pkcs12_failure(stderr: &str, status: ExitStatus) -> Error {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("mac verify") || lower.contains("invalid password") {
        Error::InvalidPassword
    } else if lower.contains("unsupported") {
        Error::Credential(format!(
            "PKCS#12 uses an unsupported cipher (retry with legacy mode): {stderr}"
        ))
    } else if lower.contains("asn1") || lower.contains("decode") || lower.contains("expecting") {
        Error::Credential(format!("Invalid PKCS#12: {stderr}"))
    } else {
        Error::SigningEngine(format!("openssl pkcs12 failed ({status}): {stderr}"))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Exit status and captured stderr of a finished child.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured stderr, truncated to 64 KiB.
    pub stderr: Vec<u8>,
}

/// Runs `cmd` to completion or kills it after `timeout`.
///
/// Stdout is discarded and stdin is closed. Stderr is drained on a helper
/// thread so a chatty child cannot block on a full pipe.
///
/// # Errors
///
/// Returns the spawn error unchanged (so [`io::ErrorKind::NotFound`] means the
/// program is missing) and [`io::ErrorKind::TimedOut`] if the deadline passed.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> io::Result<ProcessOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let reader = child.stderr.take().map(|stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.take(MAX_STDERR_BYTES).read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not exit within {timeout:?}", program_name(cmd.get_program())),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stderr = reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    Ok(ProcessOutput { status, stderr })
}

fn program_name(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}
