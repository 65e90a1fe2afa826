use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

pub const MIN_KEY_LENGTH: usize = 32;

/// Encrypts mailbox credentials and OAuth tokens before they reach the database.
#[derive(Clone)]
pub struct SecretsManager {
    key: Vec<u8>,
}

impl std::fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsManager")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SecretsManager {
    /// Derives the AES-256 key as SHA-256 of the configured passphrase.
    pub fn new(passphrase: &str) -> Result<Self> {
        if passphrase.len() < MIN_KEY_LENGTH {
            return Err(anyhow!(
                "Encryption key must be at least {} characters",
                MIN_KEY_LENGTH
            ));
        }

        let key = Sha256::digest(passphrase.as_bytes()).to_vec();
        Ok(Self { key })
    }

    pub fn generate_passphrase() -> String {
        let mut key = [0u8; 32];
        use rand::RngCore;
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let combined = BASE64
            .decode(encrypted)
            .map_err(|e| anyhow!("Invalid encrypted data encoding: {}", e))?;

        if combined.len() < 12 {
            return Err(anyhow!("Invalid encrypted data: too short"));
        }

        let (nonce, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce);

        let key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(key);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 in decrypted data: {}", e))
    }

    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_optional(&self, encrypted: Option<&str>) -> Result<Option<String>> {
        encrypted.map(|e| self.decrypt(e)).transpose()
    }
}

/// SHA-256 hex digest of a bearer token; sessions are looked up by this value.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SecretsManager {
        SecretsManager::new("unit-test-encryption-passphrase-0123456789").unwrap()
    }

    #[test]
    fn test_encryption_decryption() {
        let secrets = manager();
        let plaintext = "imap app password";

        let encrypted = secrets.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(secrets.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_different_encryptions() {
        let secrets = manager();
        let encrypted1 = secrets.encrypt("Same text").unwrap();
        let encrypted2 = secrets.encrypt("Same text").unwrap();

        // Different nonces should produce different ciphertexts
        assert_ne!(encrypted1, encrypted2);
        assert_eq!(secrets.decrypt(&encrypted1).unwrap(), "Same text");
        assert_eq!(secrets.decrypt(&encrypted2).unwrap(), "Same text");
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = manager().encrypt("refresh-token").unwrap();
        let other = SecretsManager::new("another-passphrase-that-is-long-enough!!").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_short_passphrase_rejected() {
        assert!(SecretsManager::new("too-short").is_err());
    }

    #[test]
    fn test_invalid_encrypted_data() {
        let secrets = manager();
        assert!(secrets.decrypt("not-base64!@#").is_err());
        assert!(secrets.decrypt("dGVzdA==").is_err());
        let invalid = BASE64.encode(vec![0u8; 20]);
        assert!(secrets.decrypt(&invalid).is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let secrets = manager();
        assert_eq!(secrets.encrypt_optional(None).unwrap(), None);
        let sealed = secrets.encrypt_optional(Some("token")).unwrap();
        assert_eq!(
            secrets.decrypt_optional(sealed.as_deref()).unwrap(),
            Some("token".to_string())
        );
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let a = hash_token("abc");
        assert_eq!(a, hash_token("abc"));
        assert_eq!(a.len(), 64);
        assert_eq!(
            a,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
