//! Field-level encryption at rest for tenant secrets.
//!
//! Provides AES-256-GCM authenticated encryption for individual secret
//! columns (bot tokens, source-control tokens).
//!
//! # Security Properties
//!
//! - **Algorithm**: AES-256-GCM (authenticated encryption)
//! - **Key**: 32 bytes (256 bits) supplied as 64 hex characters
//! - **Nonce**: 12 bytes, randomly generated per encryption
//! - **Format**: `<nonce hex>:<ciphertext+tag hex>`, self-contained given the key
//!
//! There is no fallback key. A missing or malformed key is a configuration
//! error and the credential store refuses to start.
//!
//! # Usage
//!
//! ```bash
//! # Generate a key (32 random bytes, hex encoded)
//! hookcord generate-key
//!
//! export HOOKCORD_ENCRYPTION_KEY="your-64-hex-character-key"
//! ```

use crate::{Error, Result};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use secrecy::SecretString;

/// Nonce size for AES-256-GCM (12 bytes / 96 bits).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (32 bytes / 256 bits).
const KEY_SIZE: usize = 32;

/// Authentication tag appended to every ciphertext.
const TAG_SIZE: usize = 16;

/// Separator between nonce and ciphertext in the persisted text.
const FIELD_SEPARATOR: char = ':';

/// A validated 256-bit encryption key.
#[derive(Clone)]
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

impl EncryptionKey {
    /// Parses a key from exactly 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key has the wrong length or is not hex.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key_hex = key_hex.trim();
        if key_hex.len() != KEY_SIZE * 2 {
            return Err(Error::Config(format!(
                "encryption key must be {} hex characters, got {}",
                KEY_SIZE * 2,
                key_hex.len()
            )));
        }

        let bytes = hex::decode(key_hex)
            .map_err(|e| Error::Config(format!("encryption key is not valid hex: {e}")))?;

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Generates a fresh random key, returned as 64 hex characters.
    ///
    /// Only used by the `generate-key` command; the store never generates keys.
    #[must_use]
    pub fn generate_hex() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        hex::encode(key)
    }
}

/// AES-256-GCM cipher for individual secret fields.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor").finish_non_exhaustive()
    }
}

impl Encryptor {
    /// Creates a new encryptor from a validated key.
    ///
    /// # Errors
    ///
    /// Returns an error if the cipher rejects the key.
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key.key)
            .map_err(|e| Error::Config(format!("invalid AES-256 key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypts one secret value.
    ///
    /// Every call draws a fresh nonce, so equal plaintexts produce different
    /// ciphertexts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if encryption fails.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::storage("encrypt_field", format!("AES-256-GCM failed: {e}")))?;

        tracing::trace!(
            plaintext_len = plaintext.len(),
            ciphertext_len = ciphertext.len(),
            "Encrypted secret field"
        );

        Ok(format!(
            "{}{FIELD_SEPARATOR}{}",
            hex::encode(nonce),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypts one persisted secret value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the value is not in `nonce:ciphertext`
    /// form, or if authentication fails (wrong key or corrupted data).
    pub fn decrypt_field(&self, encoded: &str) -> Result<SecretString> {
        let (nonce_hex, ciphertext_hex) = encoded
            .split_once(FIELD_SEPARATOR)
            .ok_or_else(|| Error::storage("decrypt_field", "missing nonce separator"))?;

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|e| Error::storage("decrypt_field", format!("invalid nonce hex: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(Error::storage(
                "decrypt_field",
                format!("nonce must be {NONCE_SIZE} bytes, got {}", nonce_bytes.len()),
            ));
        }

        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| Error::storage("decrypt_field", format!("invalid ciphertext hex: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::storage(
                "decrypt_field",
                format!("ciphertext too short: {} bytes", ciphertext.len()),
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|e| {
                Error::storage(
                    "decrypt_field",
                    format!("AES-256-GCM failed (wrong key or corrupted data): {e}"),
                )
            })?;

        let plaintext = String::from_utf8(plaintext)
            .map_err(|e| Error::storage("decrypt_field", format!("plaintext not UTF-8: {e}")))?;

        Ok(SecretString::from(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn encryptor() -> Encryptor {
        Encryptor::new(&EncryptionKey::from_hex(TEST_KEY).unwrap()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let encryptor = encryptor();
        let encrypted = encryptor.encrypt_field("ghp_supersecret").unwrap();

        assert!(encrypted.contains(':'));
        assert!(!encrypted.contains("ghp_supersecret"));

        let decrypted = encryptor.decrypt_field(&encrypted).unwrap();
        assert_eq!(decrypted.expose_secret(), "ghp_supersecret");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let encryptor = encryptor();
        let encrypted = encryptor.encrypt_field("").unwrap();
        assert_eq!(encryptor.decrypt_field(&encrypted).unwrap().expose_secret(), "");
    }

    #[test]
    fn test_different_nonces_produce_different_ciphertext() {
        let encryptor = encryptor();

        let first = encryptor.encrypt_field("same token").unwrap();
        let second = encryptor.encrypt_field("same token").unwrap();
        assert_ne!(first, second);

        assert_eq!(
            encryptor.decrypt_field(&first).unwrap().expose_secret(),
            encryptor.decrypt_field(&second).unwrap().expose_secret()
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encryptor().encrypt_field("secret").unwrap();

        let mut other = TEST_KEY.to_string();
        other.replace_range(0..2, "ff");
        let other = Encryptor::new(&EncryptionKey::from_hex(&other).unwrap()).unwrap();

        assert!(other.decrypt_field(&encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let encryptor = encryptor();
        let mut encrypted = encryptor.encrypt_field("secret").unwrap();
        let last = encrypted.pop().unwrap();
        encrypted.push(if last == '0' { '1' } else { '0' });

        assert!(encryptor.decrypt_field(&encrypted).is_err());
    }

    #[test]
    fn test_malformed_fields_fail() {
        let encryptor = encryptor();
        assert!(encryptor.decrypt_field("no-separator").is_err());
        assert!(encryptor.decrypt_field("zz:00").is_err());
        assert!(encryptor.decrypt_field("0011:00").is_err());
        assert!(
            encryptor
                .decrypt_field("000000000000000000000000:00")
                .is_err()
        );
    }

    #[test]
    fn test_key_from_hex_validation() {
        assert!(EncryptionKey::from_hex(TEST_KEY).is_ok());
        assert!(EncryptionKey::from_hex(&format!("  {TEST_KEY}\n")).is_ok());

        let short = EncryptionKey::from_hex("abcd");
        assert!(matches!(short, Err(Error::Config(_))));

        let not_hex = EncryptionKey::from_hex(&"zz".repeat(32));
        assert!(matches!(not_hex, Err(Error::Config(_))));
    }

    #[test]
    fn test_generated_key_is_valid() {
        let key = EncryptionKey::generate_hex();
        assert_eq!(key.len(), 64);
        assert!(EncryptionKey::from_hex(&key).is_ok());
        assert_ne!(key, EncryptionKey::generate_hex());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_hex(TEST_KEY).unwrap();
        assert_eq!(format!("{key:?}"), "EncryptionKey([REDACTED])");
    }
}
