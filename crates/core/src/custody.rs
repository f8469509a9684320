//! Key custody: encryption at rest for operator keys and builder secrets.
//!
//! The boundary is deliberately narrow (encrypt/decrypt of opaque strings) so
//! the local AES implementation can be swapped for a remote KMS without
//! touching the executor. Decrypted material is never logged and never held
//! beyond the call that needs it.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::config::KmsBackend;
use crate::error::CustodyError;

/// AES-GCM nonce length in bytes, prepended to every ciphertext.
const NONCE_LEN: usize = 12;

/// Symmetric custody interface.
pub trait KeyCustody: Send + Sync {
    /// Encrypt a plaintext into an opaque base64 token.
    fn encrypt(&self, plain: &str) -> Result<String, CustodyError>;

    /// Decrypt a token produced by [`KeyCustody::encrypt`].
    fn decrypt(&self, opaque: &str) -> Result<String, CustodyError>;
}

/// Local AES-256-GCM custody.
///
/// Layout: `nonce || ciphertext_with_tag`, base64-encoded. A fresh 12-byte
/// random nonce is drawn for every encryption.
pub struct LocalKeyCustody {
    cipher: Aes256Gcm,
}

impl LocalKeyCustody {
    /// Build from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, CustodyError> {
        if key.len() != 32 {
            return Err(CustodyError::BadKeySize);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CustodyError::BadKeySize)?;
        Ok(Self { cipher })
    }

    /// Build from the base64-encoded key carried in configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CustodyError> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|_| CustodyError::BadKeySize)?;
        Self::new(&key)
    }
}

impl KeyCustody for LocalKeyCustody {
    fn encrypt(&self, plain: &str) -> Result<String, CustodyError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| CustodyError::DecryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    fn decrypt(&self, opaque: &str) -> Result<String, CustodyError> {
        let data = BASE64
            .decode(opaque.trim())
            .map_err(|_| CustodyError::DecryptFailed)?;
        if data.len() <= NONCE_LEN {
            return Err(CustodyError::DecryptFailed);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CustodyError::DecryptFailed)?;

        String::from_utf8(plain).map_err(|_| CustodyError::DecryptFailed)
    }
}

/// Construct the custody backend selected by configuration.
///
/// Only the local backend is implemented; the aws-kms and vault selectors are
/// reserved and fail construction explicitly.
pub fn from_config(
    backend: KmsBackend,
    kms_config: &str,
) -> Result<std::sync::Arc<dyn KeyCustody>, CustodyError> {
    match backend {
        KmsBackend::Local => Ok(std::sync::Arc::new(LocalKeyCustody::from_base64_key(
            kms_config,
        )?)),
        KmsBackend::AwsKms => Err(CustodyError::Unsupported("aws-kms".into())),
        KmsBackend::Vault => Err(CustodyError::Unsupported("vault".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custody() -> LocalKeyCustody {
        LocalKeyCustody::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let custody = custody();
        let token = custody.encrypt("operator-private-key").unwrap();
        assert_ne!(token, "operator-private-key");
        assert_eq!(custody.decrypt(&token).unwrap(), "operator-private-key");
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let custody = custody();
        let a = custody.encrypt("same input").unwrap();
        let b = custody.encrypt("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(custody.decrypt(&a).unwrap(), custody.decrypt(&b).unwrap());
    }

    #[test]
    fn test_bad_key_size_rejected() {
        assert!(matches!(
            LocalKeyCustody::new(&[0u8; 16]),
            Err(CustodyError::BadKeySize)
        ));
        assert!(matches!(
            LocalKeyCustody::from_base64_key("dG9vLXNob3J0"),
            Err(CustodyError::BadKeySize)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let custody = custody();
        let token = custody.encrypt("secret").unwrap();
        let mut raw = BASE64.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = BASE64.encode(raw);
        assert!(matches!(
            custody.decrypt(&tampered),
            Err(CustodyError::DecryptFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = custody().encrypt("secret").unwrap();
        let other = LocalKeyCustody::new(&[8u8; 32]).unwrap();
        assert!(matches!(
            other.decrypt(&token),
            Err(CustodyError::DecryptFailed)
        ));
    }

    #[test]
    fn test_truncated_token_fails() {
        let custody = custody();
        assert!(custody.decrypt("AAAA").is_err());
        assert!(custody.decrypt("not base64 !!!").is_err());
    }

    #[test]
    fn test_unsupported_backends() {
        assert!(matches!(
            from_config(KmsBackend::AwsKms, ""),
            Err(CustodyError::Unsupported(_))
        ));
        assert!(matches!(
            from_config(KmsBackend::Vault, ""),
            Err(CustodyError::Unsupported(_))
        ));
    }
}
