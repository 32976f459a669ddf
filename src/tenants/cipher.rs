//! Encryption of store database credentials at rest.
//!
//! Blobs are `base64(nonce || AES-256-GCM ciphertext)` of the JSON encoded
//! `ConnectionParams`. The store id is authenticated as associated data, so a
//! blob only decrypts for the store it was written for.
use std::fmt;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use failure::Error as FailureError;
use serde_json;

use errors::Error;
use models::{ConnectionParams, StoreId};

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("CredentialCipher { key: <redacted> }")
    }
}

impl CredentialCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Cipher from the base64 encoded key of the `tenants.encryption_key` setting
    pub fn from_base64(encoded: &str) -> Result<Self, FailureError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format_err!("Encryption key is not valid base64: {}", e))?;
        if bytes.len() != 32 {
            return Err(format_err!("Encryption key must be 32 bytes, got {}", bytes.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self::new(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    pub fn encrypt(&self, store_id: StoreId, params: &ConnectionParams) -> Result<String, FailureError> {
        let plaintext = serde_json::to_vec(params)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &store_id.0.as_bytes()[..],
                },
            )
            .map_err(|e| format_err!("Encrypt credentials of store {}: {}", store_id, e))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    /// Decrypts the credentials of `store_id`. Any failure is a `CredentialDecryptionFailed`.
    pub fn decrypt(&self, store_id: StoreId, encoded: &str) -> Result<ConnectionParams, FailureError> {
        self.try_decrypt(store_id, encoded)
            .map_err(|e| e.context(Error::CredentialDecryptionFailed).into())
    }

    fn try_decrypt(&self, store_id: StoreId, encoded: &str) -> Result<ConnectionParams, FailureError> {
        let combined = STANDARD
            .decode(encoded)
            .map_err(|e| format_err!("Credentials of store {} are not valid base64: {}", store_id, e))?;
        if combined.len() <= NONCE_LEN {
            return Err(format_err!("Credentials of store {} are too short", store_id));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &store_id.0.as_bytes()[..],
                },
            )
            .map_err(|_| format_err!("Credentials of store {} failed authentication", store_id))?;

        serde_json::from_slice(&plaintext).map_err(|e| format_err!("Credentials of store {} are malformed: {}", store_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use errors::error_kind;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: "localhost".to_string(),
            port: 5432,
            database: "store_acme".to_string(),
            username: "acme".to_string(),
            password: "s3cret".to_string(),
            ssl_mode: None,
        }
    }

    fn assert_decryption_failed(err: &FailureError) {
        match error_kind(err) {
            Some(Error::CredentialDecryptionFailed) => {}
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn decrypts_what_it_encrypts() {
        let cipher = CredentialCipher::new([7u8; 32]);
        let store_id = StoreId::new();
        let blob = cipher.encrypt(store_id, &params()).unwrap();
        assert!(!blob.contains("s3cret"));
        assert_eq!(cipher.decrypt(store_id, &blob).unwrap(), params());
    }

    #[test]
    fn decryption_is_deterministic() {
        let cipher = CredentialCipher::new([7u8; 32]);
        let store_id = StoreId::new();
        let blob = cipher.encrypt(store_id, &params()).unwrap();
        let first = cipher.decrypt(store_id, &blob).unwrap();
        let second = cipher.decrypt(store_id, &blob).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = CredentialCipher::new([7u8; 32]);
        let store_id = StoreId::new();
        assert_ne!(
            cipher.encrypt(store_id, &params()).unwrap(),
            cipher.encrypt(store_id, &params()).unwrap()
        );
    }

    #[test]
    fn wrong_key_fails() {
        let store_id = StoreId::new();
        let blob = CredentialCipher::new([7u8; 32]).encrypt(store_id, &params()).unwrap();
        let err = CredentialCipher::new([8u8; 32]).decrypt(store_id, &blob).unwrap_err();
        assert_decryption_failed(&err);
    }

    #[test]
    fn blob_of_another_store_fails() {
        let cipher = CredentialCipher::new([7u8; 32]);
        let blob = cipher.encrypt(StoreId::new(), &params()).unwrap();
        let err = cipher.decrypt(StoreId::new(), &blob).unwrap_err();
        assert_decryption_failed(&err);
    }

    #[test]
    fn garbage_fails() {
        let cipher = CredentialCipher::new([7u8; 32]);
        assert_decryption_failed(&cipher.decrypt(StoreId::new(), "not base64!").unwrap_err());
        assert_decryption_failed(&cipher.decrypt(StoreId::new(), "AAAA").unwrap_err());
    }

    #[test]
    fn key_must_be_32_bytes() {
        assert!(CredentialCipher::from_base64("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").is_ok());
        assert!(CredentialCipher::from_base64("AAAA").is_err());
        assert!(CredentialCipher::from_base64("***").is_err());
    }
}
