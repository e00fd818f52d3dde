// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! # Credential Vault
//!
//! Symmetric encryption for refresh tokens at rest, using
//! XChaCha20-Poly1305. Ciphertext tokens are `base64(nonce ‖ aead)` with a
//! random 24-byte nonce per encryption, so equal plaintexts never produce
//! equal tokens.
//!
//! ## Key Bootstrap
//!
//! The 32-byte master key is resolved once, at construction:
//!
//! 1. `EPIC_VAULT_KEY` environment value (base64, 32 bytes), else
//! 2. the key file (`EPIC_VAULT_KEY_FILE`, default `.epic_vault_key`), else
//! 3. a freshly generated key, persisted to that file (first-run bootstrap).
//!
//! Rotating the master key is out of scope: doing so invalidates every
//! stored refresh token and requires re-linking all accounts.

use std::fs;
use std::path::Path;

use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use tracing::{info, warn};

use crate::config::Config;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The master key could not be resolved or persisted.
    #[error("vault key unavailable: {0}")]
    Key(String),

    #[error("encryption failed")]
    Encryption,

    /// Ciphertext is corrupted, truncated, or was produced under a
    /// different master key. Never returns garbage plaintext.
    #[error("decryption failed: ciphertext invalid or foreign")]
    Decryption,
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Encrypts and decrypts refresh tokens with one process-wide master key.
pub struct CredentialVault {
    cipher: XChaCha20Poly1305,
}

impl CredentialVault {
    /// Resolve the master key (env → key file → generated) and build the
    /// vault.
    pub fn new(explicit_key: Option<&str>, key_file: &Path) -> VaultResult<Self> {
        let key = resolve_key(explicit_key, key_file)?;
        let cipher =
            XChaCha20Poly1305::new_from_slice(&key).map_err(|_| VaultError::Key("bad key length".into()))?;
        Ok(Self { cipher })
    }

    pub fn from_config(config: &Config) -> VaultResult<Self> {
        Self::new(config.vault_key.as_deref(), &config.vault_key_file)
    }

    /// Encrypt a plaintext token into an opaque storage value.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;

        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(Base64::encode_string(&payload))
    }

    /// Decrypt a storage value back into the plaintext token.
    pub fn decrypt(&self, token: &str) -> VaultResult<String> {
        let payload = Base64::decode_vec(token).map_err(|_| VaultError::Decryption)?;
        if payload.len() <= NONCE_LEN {
            return Err(VaultError::Decryption);
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Decryption)
    }
}

fn resolve_key(explicit_key: Option<&str>, key_file: &Path) -> VaultResult<[u8; KEY_LEN]> {
    if let Some(encoded) = explicit_key {
        return decode_key(encoded.trim())
            .ok_or_else(|| VaultError::Key("EPIC_VAULT_KEY is not a base64 32-byte key".into()));
    }

    match fs::read_to_string(key_file) {
        Ok(contents) => {
            let key = decode_key(contents.trim()).ok_or_else(|| {
                VaultError::Key(format!("key file {} is corrupted", key_file.display()))
            })?;
            info!(file = %key_file.display(), "vault key loaded from file");
            Ok(key)
        }
        Err(_) => {
            let mut key = [0_u8; KEY_LEN];
            OsRng.fill_bytes(&mut key);

            if let Some(parent) = key_file.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .map_err(|e| VaultError::Key(format!("cannot create key dir: {e}")))?;
                }
            }
            fs::write(key_file, Base64::encode_string(&key))
                .map_err(|e| VaultError::Key(format!("cannot persist key file: {e}")))?;
            warn!(file = %key_file.display(), "generated new vault key; existing ciphertexts (if any) are now unreadable");
            Ok(key)
        }
    }
}

fn decode_key(encoded: &str) -> Option<[u8; KEY_LEN]> {
    let bytes = Base64::decode_vec(encoded).ok()?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault_in(dir: &TempDir) -> CredentialVault {
        CredentialVault::new(None, &dir.path().join("key")).unwrap()
    }

    #[test]
    fn round_trip_preserves_plaintext() {
        let dir = TempDir::new().unwrap();
        let vault = vault_in(&dir);

        for token in ["r", "refresh-token-value", "ünïcødé 🔑", &"x".repeat(4096)] {
            let ciphertext = vault.encrypt(token).unwrap();
            assert_ne!(ciphertext, *token);
            assert_eq!(vault.decrypt(&ciphertext).unwrap(), *token);
        }
    }

    #[test]
    fn equal_plaintexts_produce_distinct_ciphertexts() {
        let dir = TempDir::new().unwrap();
        let vault = vault_in(&dir);
        assert_ne!(vault.encrypt("same").unwrap(), vault.encrypt("same").unwrap());
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let dir = TempDir::new().unwrap();
        let vault = vault_in(&dir);

        let mut ciphertext = vault.encrypt("secret").unwrap();
        // Flip a character somewhere past the nonce prefix
        let flipped = if ciphertext.ends_with('A') { 'B' } else { 'A' };
        ciphertext.pop();
        ciphertext.push(flipped);

        assert!(matches!(vault.decrypt(&ciphertext), Err(VaultError::Decryption)));
    }

    #[test]
    fn foreign_key_ciphertext_fails_decryption() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let vault_a = vault_in(&dir_a);
        let vault_b = vault_in(&dir_b);

        let ciphertext = vault_a.encrypt("secret").unwrap();
        assert!(matches!(vault_b.decrypt(&ciphertext), Err(VaultError::Decryption)));
    }

    #[test]
    fn garbage_inputs_fail_decryption() {
        let dir = TempDir::new().unwrap();
        let vault = vault_in(&dir);

        assert!(matches!(vault.decrypt("not base64 !!!"), Err(VaultError::Decryption)));
        assert!(matches!(vault.decrypt(""), Err(VaultError::Decryption)));
        assert!(matches!(
            vault.decrypt(&Base64::encode_string(b"short")),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn generated_key_is_persisted_and_reused() {
        let dir = TempDir::new().unwrap();
        let key_file = dir.path().join("key");

        let first = CredentialVault::new(None, &key_file).unwrap();
        let ciphertext = first.encrypt("persisted").unwrap();

        // A second vault over the same file must read the same key back.
        let second = CredentialVault::new(None, &key_file).unwrap();
        assert_eq!(second.decrypt(&ciphertext).unwrap(), "persisted");
    }

    #[test]
    fn explicit_key_wins_over_key_file() {
        let dir = TempDir::new().unwrap();
        let key_file = dir.path().join("key");

        let mut key = [0_u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let encoded = Base64::encode_string(&key);

        let vault = CredentialVault::new(Some(&encoded), &key_file).unwrap();
        let ciphertext = vault.encrypt("env-keyed").unwrap();

        // Key file was never written.
        assert!(!key_file.exists());

        let again = CredentialVault::new(Some(&encoded), &key_file).unwrap();
        assert_eq!(again.decrypt(&ciphertext).unwrap(), "env-keyed");
    }

    #[test]
    fn malformed_explicit_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = CredentialVault::new(Some("tooshort"), &dir.path().join("key"));
        assert!(matches!(result, Err(VaultError::Key(_))));
    }
}
