//! At-rest encryption for sensitive fields
//!
//! Fields derived from tasks classified pii/phi are sealed with
//! ChaCha20-Poly1305 under `DB_ENCRYPTION_KEY` before they reach the store.
//! Ciphertext is hex with the random nonce prefixed and an `enc:` marker so
//! plaintext rows written before a key was configured still load.

use crate::error::{EngineError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

const MARKER: &str = "enc:";
const NONCE_LEN: usize = 12;

/// Seals and opens sensitive field values.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: ChaCha20Poly1305,
}

impl FieldCipher {
    /// Derive the cipher key from the configured secret.
    ///
    /// The secret is hashed to the fixed 32-byte key size, so any secret of
    /// at least the configured minimum length works.
    pub fn new(secret: &[u8]) -> Self {
        let digest = Sha256::digest(secret);
        let key = Key::from_slice(&digest);
        Self {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| EngineError::Store("field encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{MARKER}{}", hex::encode(sealed)))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let Some(encoded) = sealed.strip_prefix(MARKER) else {
            // plaintext row from before encryption was configured
            return Ok(sealed.to_string());
        };
        let bytes = hex::decode(encoded)
            .map_err(|_| EngineError::Store("sealed field is not valid hex".to_string()))?;
        if bytes.len() < NONCE_LEN {
            return Err(EngineError::Store("sealed field is truncated".to_string()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EngineError::Store("field decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| EngineError::Store("decrypted field is not UTF-8".to_string()))
    }

    /// Whether a stored value carries the encryption marker.
    pub fn is_sealed(value: &str) -> bool {
        value.starts_with(MARKER)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
