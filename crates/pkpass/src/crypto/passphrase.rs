//! Per-build random passphrases.

use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::SecretString;

/// Length of generated passphrases.
pub const PASSPHRASE_LEN: usize = 32;

/// Generates a fresh alphanumeric passphrase from the thread-local CSPRNG.
///
/// Used to re-encrypt extracted private keys while they sit in scratch space.
pub fn generate() -> SecretString {
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSPHRASE_LEN)
        .map(char::from)
        .collect();
    SecretString::new(value)
}
