//! AES-256-GCM encryption for credential storage

use crate::utils::error::{GatewayError, Result};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// AES-256-GCM nonce size (96 bits / 12 bytes as recommended by NIST)
const NONCE_SIZE: usize = 12;

/// GCM authentication tag size
const TAG_SIZE: usize = 16;

/// Number of key characters exposed by [`key_prefix`]
const PREFIX_LEN: usize = 8;

/// Cipher for API keys at rest.
///
/// Storage format is `base64(nonce || ciphertext || tag)` with a random
/// 12-byte nonce per encryption. When constructed without a key the cipher
/// passes plaintext through unchanged; that mode exists for development
/// setups only.
pub struct KeyCipher {
    key: Option<[u8; 32]>,
}

impl KeyCipher {
    /// Build a cipher from a base64-encoded key.
    ///
    /// The decoded key must be exactly 32 bytes. An empty or absent key
    /// yields the plaintext passthrough cipher.
    pub fn from_base64(encoded: Option<&str>) -> Result<Self> {
        let encoded = match encoded {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(Self { key: None }),
        };

        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| GatewayError::Crypto(format!("Failed to decode encryption key: {}", e)))?;
        if bytes.len() != 32 {
            return Err(GatewayError::Crypto(format!(
                "Encryption key must be 32 bytes, got {}",
                bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key: Some(key) })
    }

    /// Derive a cipher from an arbitrary passphrase using SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        Self {
            key: Some(hasher.finalize().into()),
        }
    }

    /// Whether this cipher actually encrypts (false in dev passthrough mode)
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt a plaintext key for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(plaintext.to_string()),
        };

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| GatewayError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);

        Ok(general_purpose::STANDARD.encode(&output))
    }

    /// Decrypt a stored key.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(encrypted.to_string()),
        };

        let bytes = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| GatewayError::Crypto(format!("Failed to decode encrypted key: {}", e)))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(GatewayError::Crypto(
                "Encrypted key too short - possible corruption or tampering".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let nonce = Nonce::from_slice(&bytes[..NONCE_SIZE]);
        let ciphertext = &bytes[NONCE_SIZE..];

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
            GatewayError::Crypto(
                "Decryption failed - data may have been tampered with or wrong key".to_string(),
            )
        })?;

        String::from_utf8(plaintext)
            .map_err(|e| GatewayError::Crypto(format!("Decrypted key is not valid UTF-8: {}", e)))
    }
}

/// Identification prefix for an API key: first 8 characters plus an ellipsis.
///
/// Never reveals more than 8 characters regardless of key length.
pub fn key_prefix(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(PREFIX_LEN).collect();
    format!("{}…", prefix)
}
