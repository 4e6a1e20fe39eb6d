//! Request/response payload protection
//!
//! - `Plain`: payloads pass through unchanged.
//! - `Symmetric`: AES-256-GCM keyed with SHA-256 of the shared key. Sealed
//!   payloads are `base64url(nonce || ciphertext || tag)` without padding.
//! - `SignedToken`: payloads in clear; every request carries the access
//!   token, a timestamp and `base64url(HMAC-SHA256(key, "dn|id|ts"))`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::{Credentials, EncryptionMode};
use crate::error::{Error, Result};

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// AES-GCM tag length in bytes
const TAG_LEN: usize = 16;

/// Authentication parameters of a signed-token request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    pub token: String,
    pub timestamp: i64,
    pub signature: String,
}

/// Seals outbound payloads and opens responses for one encryption mode
pub struct PayloadCipher {
    mode: EncryptionMode,
    key: [u8; 32],
    secret: Vec<u8>,
    token: Option<String>,
}

impl PayloadCipher {
    /// Build a cipher from credentials
    pub fn new(credentials: &Credentials, mode: EncryptionMode) -> Self {
        let digest = Sha256::digest(credentials.dns_key.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);

        Self {
            mode,
            key,
            secret: credentials.dns_key.as_bytes().to_vec(),
            token: credentials.token.clone(),
        }
    }

    /// Encryption mode in use
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Protect an outbound payload
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        match self.mode {
            EncryptionMode::Plain | EncryptionMode::SignedToken => Ok(plaintext.to_string()),
            EncryptionMode::Symmetric => {
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| Error::encryption(format!("cipher init: {}", e)))?;

                let mut nonce_bytes = [0u8; NONCE_LEN];
                rand::thread_rng().fill(&mut nonce_bytes);

                let ciphertext = cipher
                    .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
                    .map_err(|e| Error::encryption(format!("encryption failed: {}", e)))?;

                let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                sealed.extend_from_slice(&nonce_bytes);
                sealed.extend_from_slice(&ciphertext);
                Ok(URL_SAFE_NO_PAD.encode(sealed))
            }
        }
    }

    /// Recover a response body
    pub fn open(&self, body: &[u8]) -> Result<String> {
        let plaintext = match self.mode {
            EncryptionMode::Plain | EncryptionMode::SignedToken => body.to_vec(),
            EncryptionMode::Symmetric => {
                let text = std::str::from_utf8(body)
                    .map_err(|_| Error::malformed("encrypted body is not text"))?;
                let sealed = URL_SAFE_NO_PAD
                    .decode(text.trim())
                    .map_err(|e| Error::malformed(format!("encrypted body is not base64: {}", e)))?;

                if sealed.len() < NONCE_LEN + TAG_LEN {
                    return Err(Error::malformed(format!(
                        "encrypted body too short: {} bytes",
                        sealed.len()
                    )));
                }

                let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| Error::encryption(format!("cipher init: {}", e)))?;
                cipher
                    .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
                    .map_err(|_| Error::encryption("decryption failed: wrong key or corrupted body"))?
            }
        };

        String::from_utf8(plaintext).map_err(|_| Error::malformed("response is not UTF-8"))
    }

    /// Signature parameters for signed-token mode (`None` otherwise)
    pub fn sign(&self, dn: &str, dns_id: u32, timestamp: i64) -> Result<Option<RequestSignature>> {
        if self.mode != EncryptionMode::SignedToken {
            return Ok(None);
        }

        let token = self
            .token
            .clone()
            .ok_or_else(|| Error::config("token is required for signed-token mode"))?;

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.secret)
            .map_err(|e| Error::encryption(format!("hmac init: {}", e)))?;
        mac.update(format!("{}|{}|{}", dn, dns_id, timestamp).as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(Some(RequestSignature {
            token,
            timestamp,
            signature,
        }))
    }
}
