//! Password-based key derivation.
//!
//! PBKDF2-HMAC-SHA256 producing exactly [`KEY_SIZE`] bytes. Derivation is
//! deterministic for identical inputs, which is what lets an escrowed key be
//! re-derived and verified.
//!
//! `derive` is deliberately slow. Async callers go through [`derive_async`],
//! which moves the work onto the blocking pool.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use tracing::debug;

use crate::error::CryptoError;
use crate::secret::{Salt, SecretBytes, SecretKey, KEY_SIZE, SALT_SIZE};

/// 256k rounds keeps a single derivation well under 500 ms on a current
/// desktop CPU in release builds.
pub const DEFAULT_ITERATIONS: u32 = 256_000;

pub fn generate_salt() -> Salt {
    Salt::generate()
}

pub fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Result<SecretKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSaltLength {
            expected: SALT_SIZE,
            actual: salt.len(),
        });
    }
    if iterations < 1 {
        return Err(CryptoError::InvalidIterations);
    }

    let mut output = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
    // SecretKey takes its own copy; the stack buffer is zeroized on the way out.
    let key = SecretKey::from(output);
    zeroize::Zeroize::zeroize(&mut output);
    Ok(key)
}

/// Runs [`derive`] on tokio's blocking pool. The password buffer is moved in
/// and zeroized when the task finishes, whatever the outcome.
pub async fn derive_async(
    password: SecretBytes,
    salt: Salt,
    iterations: u32,
) -> Result<SecretKey, CryptoError> {
    debug!(iterations, "deriving key on blocking pool");
    tokio::task::spawn_blocking(move || derive(&password, salt.as_bytes(), iterations))
        .await
        .map_err(|e| CryptoError::Task(e.to_string()))?
}
