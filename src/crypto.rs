//! Model credential sealing with AES-256-GCM.
//!
//! Tenant-supplied language-model API keys are stored sealed with the
//! configured crypto key. A sealed value is standard base64 over
//! `0x01 || nonce(12) || ciphertext+tag(16)`, with the tenant id bound as
//! additional authenticated data.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine as _, engine::general_purpose};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SEALED_V1: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("crypto key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("sealing failed")]
    Seal,
    #[error("credential could not be opened with the configured key")]
    Open,
    #[error("sealed credential is truncated")]
    Truncated,
    #[error("sealed credential is not valid UTF-8")]
    NotUtf8,
    #[error("empty credential")]
    Empty,
}

/// 256-bit key wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey([u8; 32]);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        let len = bytes.len();
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(len))?;
        Ok(Self(array))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

fn seal_bytes(key: &CryptoKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Seal)?;

    let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    sealed.push(SEALED_V1);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_bytes(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Truncated);
    }
    let (header, ciphertext) = sealed.split_at(HEADER_LEN);
    key.cipher()
        .decrypt(
            Nonce::from_slice(&header[1..]),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Open)
}

fn looks_sealed(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN + TAG_LEN && bytes[0] == SEALED_V1
}

/// Seal a tenant-supplied model credential for storage.
///
/// A ciphertext copied to another tenant's row fails to open.
pub fn seal_credential(
    key: &CryptoKey,
    tenant_id: Uuid,
    credential: &str,
) -> Result<String, CryptoError> {
    let aad = tenant_id.to_string();
    let sealed = seal_bytes(key, aad.as_bytes(), credential.as_bytes())?;
    Ok(general_purpose::STANDARD.encode(sealed))
}

/// Open a stored model credential.
///
/// Values that are not base64 of a sealed payload are legacy plaintext and
/// come back trimmed.
pub fn open_credential(
    key: &CryptoKey,
    tenant_id: Uuid,
    stored: &str,
) -> Result<String, CryptoError> {
    let trimmed = stored.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::Empty);
    }

    match general_purpose::STANDARD.decode(trimmed) {
        Ok(bytes) if looks_sealed(&bytes) => {
            let aad = tenant_id.to_string();
            let plaintext = open_bytes(key, aad.as_bytes(), &bytes)?;
            String::from_utf8(plaintext).map_err(|_| CryptoError::NotUtf8)
        }
        _ => Ok(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    #[test]
    fn sealed_credential_is_bound_to_tenant() {
        let key = test_key();
        let tenant = Uuid::new_v4();

        let sealed = seal_credential(&key, tenant, "sk-tenant-key").expect("seal succeeds");
        assert_ne!(sealed, "sk-tenant-key");
        assert_eq!(
            open_credential(&key, tenant, &sealed).expect("open succeeds"),
            "sk-tenant-key"
        );
        assert!(matches!(
            open_credential(&key, Uuid::new_v4(), &sealed),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn a_different_key_cannot_open() {
        let tenant = Uuid::new_v4();
        let sealed = seal_credential(&test_key(), tenant, "AIza-key").expect("seal succeeds");
        let other = CryptoKey::new(vec![9u8; 32]).expect("valid key");
        assert!(open_credential(&other, tenant, &sealed).is_err());
    }

    #[test]
    fn sealing_twice_uses_fresh_nonces() {
        let key = test_key();
        let tenant = Uuid::new_v4();
        let first = seal_credential(&key, tenant, "same").expect("seal");
        let second = seal_credential(&key, tenant, "same").expect("seal");
        assert_ne!(first, second);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let key = test_key();
        let tenant = Uuid::new_v4();
        let sealed = seal_credential(&key, tenant, "gsk-groq").expect("seal");
        let mut bytes = general_purpose::STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = general_purpose::STANDARD.encode(bytes);
        assert!(matches!(
            open_credential(&key, tenant, &tampered),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn plaintext_credential_passes_through() {
        let key = test_key();
        let opened =
            open_credential(&key, Uuid::new_v4(), " AIza-plain-key ").expect("legacy value");
        assert_eq!(opened, "AIza-plain-key");
        assert!(matches!(
            open_credential(&key, Uuid::new_v4(), "   "),
            Err(CryptoError::Empty)
        ));
    }

    #[test]
    fn truncated_payload_is_reported() {
        let key = test_key();
        assert!(matches!(
            open_bytes(&key, b"aad", &[SEALED_V1, 0x02]),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
        assert_eq!(format!("{:?}", test_key()), "CryptoKey([REDACTED])");
    }
}
