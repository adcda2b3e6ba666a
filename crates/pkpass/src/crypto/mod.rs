//! Credential unlocking and detached signing.
//!
//! [`SigningEngine`] is implemented twice:
//!
//! - [`NativeEngine`]: linked OpenSSL, preferred
//! - [`OpensslCli`]: the `openssl` command-line tool, fallback
//!
//! Both embed the process-wide [`TrustChain`] in every signature.

pub mod cli;
pub mod engine;
pub mod native;
pub mod passphrase;
pub mod trust;

pub use cli::{CliIdentity, OpensslCli};
pub use engine::SigningEngine;
pub use native::{NativeEngine, NativeIdentity};
pub use trust::TrustChain;
