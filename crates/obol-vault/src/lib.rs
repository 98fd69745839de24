//! Symmetric credential vault: AES-256-GCM over base64-encoded secrets.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

pub const CRATE_NAME: &str = "obol-vault";

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// A password at rest: base64 ciphertext plus the base64 96-bit nonce that
/// was generated for exactly this encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub nonce: String,
}

/// Process-wide vault holding the 256-bit key supplied out of band.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; KEY_LENGTH],
}

impl CredentialVault {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Load the key from its base64 configuration form.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey(format!("not base64: {e}")))?;
        if bytes.len() != KEY_LENGTH {
            return Err(VaultError::InvalidKey(format!(
                "key must be {KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self::new(key))
    }

    /// Encrypt a plaintext password with a fresh random nonce. Nonces are
    /// never reused: every call draws new bytes from the OS CSPRNG.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, VaultError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| VaultError::Encrypt(format!("cipher init: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;

        Ok(EncryptedSecret {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    /// Decrypt a stored secret. Any mismatch between ciphertext, nonce and
    /// key (tampering, wrong key, corrupted encoding) fails here.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, VaultError> {
        let ciphertext = BASE64
            .decode(&secret.ciphertext)
            .map_err(|e| VaultError::Decrypt(format!("ciphertext not base64: {e}")))?;
        let nonce_bytes = BASE64
            .decode(&secret.nonce)
            .map_err(|e| VaultError::Decrypt(format!("nonce not base64: {e}")))?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(VaultError::Decrypt(format!(
                "nonce must be {NONCE_LENGTH} bytes, got {}",
                nonce_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| VaultError::Decrypt(format!("cipher init: {e}")))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|e| VaultError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::Decrypt(format!("plaintext not utf-8: {e}")))
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random key in its base64 configuration form. Setup/testing only.
pub fn generate_key_base64() -> String {
    let mut key = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut key);
    BASE64.encode(key)
}
