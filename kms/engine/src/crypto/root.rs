//! AES-256-GCM sealing under the process root key, plus the same AEAD for data keys.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::crypto::random_bytes;
use crate::error::{KmsError, KmsResult};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Seals and opens key material with the root key. Read-only after construction.
pub struct RootCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl RootCipher {
    pub fn new(key: &[u8]) -> KmsResult<Self> {
        if key.len() != KEY_LEN {
            return Err(KmsError::Config(format!(
                "root key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let mut buf = Zeroizing::new([0u8; KEY_LEN]);
        buf.copy_from_slice(key);
        Ok(Self { key: buf })
    }

    /// Fresh random root key for ephemeral stores.
    pub fn ephemeral() -> Self {
        Self {
            key: Zeroizing::new(random_bytes::<KEY_LEN>()),
        }
    }

    /// Returns `(nonce, ciphertext)`.
    pub fn seal(&self, plaintext: &[u8]) -> KmsResult<(Vec<u8>, Vec<u8>)> {
        seal(&self.key[..], plaintext)
    }

    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> KmsResult<Zeroizing<Vec<u8>>> {
        open(&self.key[..], nonce, ciphertext)
    }
}

impl fmt::Debug for RootCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootCipher(..)")
    }
}

/// AES-256-GCM encrypt with a fresh random nonce. Returns `(nonce, ciphertext)`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> KmsResult<(Vec<u8>, Vec<u8>)> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| KmsError::Crypto("invalid AES-256 key length".into()))?;
    let nonce_bytes = random_bytes::<NONCE_LEN>();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| KmsError::Crypto("AES-GCM encryption failed".into()))?;
    Ok((nonce_bytes.to_vec(), ciphertext))
}

/// AES-256-GCM decrypt. Any authentication failure is `DecryptionFailure`.
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> KmsResult<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN {
        return Err(KmsError::DecryptionFailure);
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| KmsError::Crypto("invalid AES-256 key length".into()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KmsError::DecryptionFailure)
}

/// Split `nonce‖ciphertext` as stored in an envelope.
pub fn split_nonce(data: &[u8]) -> KmsResult<(&[u8], &[u8])> {
    if data.len() < NONCE_LEN {
        return Err(KmsError::DecryptionFailure);
    }
    Ok(data.split_at(NONCE_LEN))
}
