//! Command-line interface for the pkpass Wallet pass builder.
//!
//! Builds signed `.pkpass` archives from a pass directory and a PKCS#12
//! bundle, and verifies existing archives.

use clap::{Parser, Subcommand, ValueEnum};
use pkpass::{verify_pass, DigestAlgorithm, Engine, OpensslCli, PassBuilder, TrustChain};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Parser)]
#[command(name = "pkpass")]
#[command(about = "Apple Wallet pass builder")]
struct Cli {
    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and sign a pass from a pass directory
    Build {
        /// Pass directory (pass.json, images, localizations)
        pass_dir: PathBuf,

        /// PKCS#12 file (.p12) with the Pass Type ID certificate and key
        #[arg(short = 'p', long)]
        pkcs12: PathBuf,

        /// Password for the PKCS#12 file
        #[arg(long, env = "PKPASS_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Output file (default: <PASS_DIR stem>.pkpass)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Intermediate certificate embedded in the signature (PEM or DER)
        #[arg(long, env = "PKPASS_WWDR_CERT")]
        wwdr: PathBuf,

        /// Signing engine
        #[arg(long, value_enum, default_value_t = EngineChoice::Native)]
        engine: EngineChoice,

        /// Path of the openssl executable (openssl engine only)
        #[arg(long, default_value = "openssl")]
        openssl: PathBuf,

        /// Pass -legacy to openssl pkcs12 (openssl engine only)
        #[arg(long, default_value_t = false)]
        legacy: bool,

        /// Seconds before an openssl invocation is killed
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Manifest digest algorithm (sha256, sha1)
        #[arg(long, default_value = "sha256")]
        digest: DigestAlgorithm,

        /// ZIP compression level (0-9, default: 6)
        /// 0 = no compression (fastest)
        /// 9 = maximum compression (slowest, smallest file)
        #[arg(short = 'z', long, default_value = "6")]
        zip_level: u32,
    },

    /// Check the manifest, digests and signature of a pass
    Verify {
        /// Pass archive (.pkpass)
        pkpass: PathBuf,

        /// Intermediate certificate used to build the signer chain
        #[arg(long, env = "PKPASS_WWDR_CERT")]
        wwdr: Option<PathBuf>,

        /// Trusted root certificate; without it only the signature is checked
        #[arg(long)]
        ca: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineChoice {
    /// Linked OpenSSL library
    Native,
    /// The openssl command-line tool
    Openssl,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PKPASS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Build {
            pass_dir,
            pkcs12,
            password,
            output,
            wwdr,
            engine,
            openssl,
            legacy,
            timeout,
            digest,
            zip_level,
        } => {
            let engine = match engine {
                EngineChoice::Native => Engine::Native,
                EngineChoice::Openssl => Engine::OpensslCli(
                    OpensslCli::new()
                        .program(openssl)
                        .timeout(Duration::from_secs(timeout))
                        .legacy(legacy),
                ),
            };

            let builder = PassBuilder::new()
                .pkcs12(&pkcs12)
                .password(password.unwrap_or_default())
                .trust_chain_file(&wwdr)?
                .engine(engine)
                .digest_algorithm(digest)
                .compression_level(zip_level);

            let output = output.unwrap_or_else(|| default_output(&pass_dir));
            builder.build_to(&pass_dir, &output)?;

            println!("Built: {}", output.display());
        }
        Commands::Verify { pkpass, wwdr, ca } => {
            let data = std::fs::read(&pkpass)?;
            let chain = wwdr.map(TrustChain::from_file).transpose()?;
            let roots = match ca {
                Some(path) => TrustChain::from_file(path)?.certificates().to_vec(),
                None => Vec::new(),
            };

            let verified = verify_pass(&data, chain.as_ref(), &roots)?;
            debug!(manifest = %String::from_utf8_lossy(&verified.manifest_bytes), "manifest");

            println!(
                "Verified: {} ({} assets, {}, {})",
                pkpass.display(),
                verified.manifest.len(),
                verified.digest_algorithm,
                if verified.chain_verified {
                    "chain trusted"
                } else {
                    "chain not checked"
                }
            );
        }
    }

    Ok(())
}

fn default_output(pass_dir: &Path) -> PathBuf {
    pass_dir.with_extension("pkpass")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("Coupon.pass")),
            PathBuf::from("Coupon.pkpass")
        );
        assert_eq!(
            default_output(Path::new("passes/Event")),
            PathBuf::from("passes/Event.pkpass")
        );
    }

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from([
            "pkpass",
            "build",
            "Coupon.pass",
            "-p",
            "cert.p12",
            "--wwdr",
            "wwdr.pem",
            "--engine",
            "openssl",
            "--digest",
            "sha1",
            "-z",
            "0",
        ])
        .unwrap();

        match cli.command {
            Commands::Build {
                engine,
                digest,
                zip_level,
                timeout,
                ..
            } => {
                assert!(matches!(engine, EngineChoice::Openssl));
                assert_eq!(digest, DigestAlgorithm::Sha1);
                assert_eq!(zip_level, 0);
                assert_eq!(timeout, 30);
            }
            Commands::Verify { .. } => panic!("expected build"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_digest() {
        let result = Cli::try_parse_from([
            "pkpass", "build", "Coupon.pass", "-p", "cert.p12", "--wwdr", "wwdr.pem", "--digest",
            "md5",
        ]);
        assert!(result.is_err());
    }
}
