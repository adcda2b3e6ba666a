pub mod builder;
pub mod bundle;
pub mod crypto;
pub mod error;
pub mod pass;

pub use builder::{Engine, PassBuilder};
pub use bundle::DigestAlgorithm;
pub use crypto::{NativeEngine, OpensslCli, SigningEngine, TrustChain};
pub use error::{Error, Stage};
pub use pass::{verify_pass, BuildState, CompressionLevel, PassSigner, VerifiedPass};

pub type Result<T> = std::result::Result<T, Error>;
