//! Hybrid encryption: AES-256-GCM for the payload, RSA-OAEP (SHA-256) for
//! the per-request AES key.

use crate::error::{Result, TransportError};
use base64::{engine::general_purpose, Engine as _};
use metron_common::types::EncryptedPayload;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

const AES_KEY_LEN: usize = 32;

fn crypto_err(context: &str) -> impl FnOnce(rsa::Error) -> TransportError + '_ {
    move |e| TransportError::Crypto(format!("{context}: {e}"))
}

/// Encrypts outgoing payloads with the collector's public key.
#[derive(Debug, Clone)]
pub struct HybridEncryptor {
    public_key: RsaPublicKey,
}

impl HybridEncryptor {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self { public_key }
    }

    /// Loads a PEM public key in either `RSA PUBLIC KEY` (PKCS#1) or
    /// `PUBLIC KEY` (SubjectPublicKeyInfo) form.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            TransportError::Crypto(format!("failed to read public key file {}: {e}", path.display()))
        })?;
        Self::from_pem(&pem)
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        let public_key = if pem.contains("BEGIN RSA PUBLIC KEY") {
            RsaPublicKey::from_pkcs1_pem(pem)
                .map_err(|e| TransportError::Crypto(format!("failed to parse PKCS#1 public key: {e}")))?
        } else if pem.contains("BEGIN PUBLIC KEY") {
            RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| TransportError::Crypto(format!("failed to parse PKIX public key: {e}")))?
        } else {
            return Err(TransportError::Crypto(
                "unsupported public key type (expected 'RSA PUBLIC KEY' or 'PUBLIC KEY')".to_string(),
            ));
        };
        Ok(Self::new(public_key))
    }

    /// Encrypts `plaintext` under a fresh AES key and wraps that key with
    /// RSA-OAEP. `data` is `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let rng = SystemRandom::new();
        let mut aes_key = [0u8; AES_KEY_LEN];
        rng.fill(&mut aes_key)
            .map_err(|_| TransportError::Crypto("failed to generate AES key".to_string()))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| TransportError::Crypto("failed to generate nonce".to_string()))?;

        let key = LessSafeKey::new(
            UnboundKey::new(&AES_256_GCM, &aes_key)
                .map_err(|_| TransportError::Crypto("invalid AES key".to_string()))?,
        );
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut in_out)
            .map_err(|_| TransportError::Crypto("AES-GCM seal failed".to_string()))?;

        let mut data = nonce_bytes.to_vec();
        data.extend_from_slice(&in_out);

        let wrapped_key = self
            .public_key
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), &aes_key)
            .map_err(crypto_err("RSA-OAEP key wrap failed"))?;

        Ok(EncryptedPayload {
            data: general_purpose::STANDARD.encode(&data),
            key: general_purpose::STANDARD.encode(&wrapped_key),
        })
    }
}

/// Collector-side counterpart of [`HybridEncryptor`].
#[derive(Debug, Clone)]
pub struct HybridDecryptor {
    private_key: RsaPrivateKey,
}

impl HybridDecryptor {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }

    /// Loads a PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private_key = if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| TransportError::Crypto(format!("failed to parse PKCS#1 private key: {e}")))?
        } else {
            RsaPrivateKey::from_pkcs8_pem(pem)
                .map_err(|e| TransportError::Crypto(format!("failed to parse PKCS#8 private key: {e}")))?
        };
        Ok(Self::new(private_key))
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        if payload.data.is_empty() || payload.key.is_empty() {
            return Err(TransportError::Crypto("invalid encrypted payload".to_string()));
        }

        let wrapped_key = general_purpose::STANDARD
            .decode(&payload.key)
            .map_err(|e| TransportError::Crypto(format!("invalid key encoding: {e}")))?;
        let aes_key = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
            .map_err(crypto_err("RSA-OAEP key unwrap failed"))?;

        let data = general_purpose::STANDARD
            .decode(&payload.data)
            .map_err(|e| TransportError::Crypto(format!("invalid data encoding: {e}")))?;
        if data.len() < NONCE_LEN + aead::AES_256_GCM.tag_len() {
            return Err(TransportError::Crypto("ciphertext too short".to_string()));
        }

        let key = LessSafeKey::new(
            UnboundKey::new(&AES_256_GCM, &aes_key)
                .map_err(|_| TransportError::Crypto("invalid AES key".to_string()))?,
        );
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| TransportError::Crypto("invalid nonce".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| TransportError::Crypto("AES-GCM open failed".to_string()))?;
        Ok(plaintext.to_vec())
    }
}
