//! At-rest encryption of session state
//!
//! AES-256-GCM with a fresh random 96-bit nonce per seal. The sealed form is
//! printable so the state file stays a plain text file:
//!
//! ```text
//! base64( nonce[12] ‖ tag[16] ‖ ciphertext )
//! ```

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{info, warn};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::{KEY_LEN, NONCE_LEN, SESSION_KEY_NAME, TAG_LEN};
use crate::errors::CipherError;
use crate::traits::KeyStore;

/// Symmetric cipher for the session file
#[derive(Clone)]
pub struct SessionCipher {
    aead: Aes256Gcm,
}

impl SessionCipher {
    /// Load the device key, creating and storing it on first use
    ///
    /// Returns `None` when the key store cannot be read or written, or holds
    /// a key of the wrong size; the session then persists in cleartext.
    pub fn bootstrap(keys: &mut dyn KeyStore) -> Option<Self> {
        match keys.get(SESSION_KEY_NAME) {
            Ok(Some(key)) => {
                let cipher = Self::from_key(&key);
                if cipher.is_none() {
                    warn!("session: stored key has {} bytes, expected {}", key.len(), KEY_LEN);
                }
                cipher
            }
            Ok(None) => {
                let mut key = [0u8; KEY_LEN];
                OsRng.fill_bytes(&mut key);
                if let Err(e) = keys.put(SESSION_KEY_NAME, &key) {
                    warn!("session: cannot store new key: {}", e);
                    return None;
                }
                info!("session: generated device key");
                Self::from_key(&key)
            }
            Err(e) => {
                warn!("session: key store unreadable: {}", e);
                None
            }
        }
    }

    /// Cipher for a raw 256-bit key
    pub fn from_key(key: &[u8]) -> Option<Self> {
        Aes256Gcm::new_from_slice(key)
            .ok()
            .map(|aead| Self { aead })
    }

    /// Encrypt and encode `plaintext`
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| CipherError::Seal)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&buffer);
        Ok(STANDARD.encode(blob))
    }

    /// Decode and decrypt a sealed blob
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CipherError> {
        let blob = STANDARD
            .decode(sealed.trim())
            .map_err(|_| CipherError::Encoding)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated { len: blob.len() });
        }

        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        let mut buffer = ciphertext.to_vec();
        self.aead
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                b"",
                &mut buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| CipherError::Authentication)?;
        Ok(buffer)
    }
}
