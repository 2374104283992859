//! Owned secret material.
//!
//! `SecretKey` and `Salt` are fixed-size newtypes. Wrong lengths are a hard
//! error, never padded or truncated. Key bytes are zeroized on drop, so every
//! exit path (return, `?`, panic unwinding) releases them.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;

/// Heap buffer for passwords and decrypted plaintext. Zeroized on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// 32 bytes of raw symmetric key material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(hex::decode(encoded).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: encoded.len() / 2,
            }
        })?);
        Self::from_slice(&decoded)
    }

    /// Constant-time comparison.
    pub fn ct_eq(&self, other: &SecretKey) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl AsRef<[u8]> for SecretKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// 16-byte KDF salt. Not secret, but validated like a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SALT_SIZE {
            return Err(CryptoError::InvalidSaltLength {
                expected: SALT_SIZE,
                actual: bytes.len(),
            });
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(bytes);
        Ok(Self(salt))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl From<[u8; SALT_SIZE]> for Salt {
    fn from(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Zero-fill a buffer in place.
pub fn wipe(buf: &mut [u8]) {
    buf.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_key_lengths() {
        for len in [0usize, 1, 16, 31, 33, 64] {
            let err = SecretKey::from_slice(&vec![7u8; len]).unwrap_err();
            assert!(matches!(
                err,
                CryptoError::InvalidKeyLength { expected: 32, actual } if actual == len
            ));
        }
    }

    #[test]
    fn rejects_wrong_salt_lengths() {
        assert!(Salt::from_slice(&[0u8; 15]).is_err());
        assert!(Salt::from_slice(&[0u8; 17]).is_err());
        assert!(Salt::from_slice(&[0u8; 16]).is_ok());
    }

    #[test]
    fn scoped_wipe_zeroes_every_byte() {
        let mut key = SecretKey::generate();
        assert!(key.as_bytes().iter().any(|b| *b != 0));
        key.zeroize();
        assert!(key.as_bytes().iter().all(|b| *b == 0));

        let mut password = b"hunter2-hunter2".to_vec();
        wipe(&mut password);
        assert!(password.iter().all(|b| *b == 0));
    }

    #[test]
    fn hex_roundtrip_and_debug_is_redacted() {
        let key = SecretKey::from([9u8; KEY_SIZE]);
        let encoded = key.to_hex();
        let restored = SecretKey::from_hex(&encoded).unwrap();
        assert!(key.ct_eq(&restored));
        assert_eq!(format!("{key:?}"), "SecretKey([REDACTED])");
        assert!(SecretKey::from_hex("abcd").is_err());
        assert!(SecretKey::from_hex("zz").is_err());
    }

    #[test]
    fn generated_values_differ() {
        assert!(!SecretKey::generate().ct_eq(&SecretKey::generate()));
        assert_ne!(Salt::generate(), Salt::generate());
    }
}
