//! Authenticated encryption of byte blobs.
//!
//! XChaCha20-Poly1305, 32-byte key, random 24-byte nonce per call, 16-byte tag.
//!
//! Blob wire format:
//!   [ nonce (24 bytes) | ciphertext | tag (16 bytes) ]

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::error::CryptoError;
use crate::secret::{SecretBytes, KEY_SIZE};

pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

/// `nonce || ciphertext || tag` in a single self-contained buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn nonce(&self) -> Option<&[u8]> {
        self.0.get(..NONCE_SIZE)
    }
}

impl AsRef<[u8]> for EncryptedBlob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedBlob, CryptoError> {
    encrypt_with_aad(plaintext, key, &[])
}

pub fn decrypt(blob: &[u8], key: &[u8]) -> Result<SecretBytes, CryptoError> {
    decrypt_with_aad(blob, key, &[])
}

/// Encrypt with associated data that is authenticated but not encrypted.
pub fn encrypt_with_aad(
    plaintext: &[u8],
    key: &[u8],
    aad: &[u8],
) -> Result<EncryptedBlob, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(EncryptedBlob(out))
}

pub fn decrypt_with_aad(blob: &[u8], key: &[u8], aad: &[u8]) -> Result<SecretBytes, CryptoError> {
    let cipher = cipher_for(key)?;
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Authentication);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Authentication)?;
    Ok(SecretBytes::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretKey;

    #[test]
    fn roundtrip_across_payload_sizes() {
        let key = SecretKey::generate();
        for size in [0usize, 1, 15, 16, 17, 1024, 70_000] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let blob = encrypt(&payload, key.as_ref()).unwrap();
            assert_eq!(blob.len(), NONCE_SIZE + size + TAG_SIZE);
            assert_eq!(&decrypt(blob.as_bytes(), key.as_ref()).unwrap()[..], &payload[..]);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = SecretKey::generate();
        let a = encrypt(b"same", key.as_ref()).unwrap();
        let b = encrypt(b"same", key.as_ref()).unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_and_tampering_are_indistinguishable() {
        let key = SecretKey::generate();
        let other = SecretKey::generate();
        let blob = encrypt(b"secret", key.as_ref()).unwrap();

        let wrong_key = decrypt(blob.as_bytes(), other.as_ref()).unwrap_err();

        let mut tampered = blob.clone().into_bytes();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let corrupted = decrypt(&tampered, key.as_ref()).unwrap_err();

        let truncated = decrypt(&blob.as_bytes()[..10], key.as_ref()).unwrap_err();

        assert!(matches!(wrong_key, CryptoError::Authentication));
        assert!(matches!(corrupted, CryptoError::Authentication));
        assert!(matches!(truncated, CryptoError::Authentication));
        assert_eq!(wrong_key.to_string(), corrupted.to_string());
        assert_eq!(corrupted.to_string(), truncated.to_string());
    }

    #[test]
    fn wrong_key_length_fails_before_anything_else() {
        for len in [0usize, 16, 31, 33] {
            let key = vec![1u8; len];
            assert!(matches!(
                encrypt(b"x", &key),
                Err(CryptoError::InvalidKeyLength { expected: 32, .. })
            ));
            assert!(matches!(
                decrypt(&[0u8; 64], &key),
                Err(CryptoError::InvalidKeyLength { expected: 32, .. })
            ));
        }
    }

    #[test]
    fn associated_data_is_bound() {
        let key = SecretKey::generate();
        let blob = encrypt_with_aad(b"payload", key.as_ref(), b"label-a").unwrap();
        assert!(decrypt_with_aad(blob.as_bytes(), key.as_ref(), b"label-a").is_ok());
        assert!(matches!(
            decrypt_with_aad(blob.as_bytes(), key.as_ref(), b"label-b"),
            Err(CryptoError::Authentication)
        ));
    }
}
