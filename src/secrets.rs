//! Seed custody: password encryption of seeds and private keys at rest, and
//! the in-memory cache that holds decrypted material for unlocked wallets.
//!
//! Encrypted layout (hex encoded): `version(1) || salt(16) || nonce(24) || ciphertext`.
//! The plaintext is prefixed with a fixed marker so a wrong password is told
//! apart from a corrupt record even if the AEAD somehow accepted it.

use std::collections::HashMap;
use std::sync::RwLock;

use argon2::{Argon2, Params};
use chacha20poly1305::{aead::{Aead, NewAead}, XChaCha20Poly1305, Key, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::config::Kdf;
use crate::error::{Result, WalletError};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const VERSION: u8 = 1;
const MARKER: &[u8] = b"61606982";

/// Argon2id + XChaCha20-Poly1305 cipher for seeds and ad-hoc private keys.
#[derive(Debug, Clone)]
pub struct SeedCipher {
    mem_kib: u32,
    time_cost: u32,
}

impl SeedCipher {
    pub fn new(kdf: &Kdf) -> Self {
        SeedCipher { mem_kib: kdf.mem_kib, time_cost: kdf.time_cost }
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = Params::new(self.mem_kib, self.time_cost, 1, None)
            .map_err(|e| WalletError::Internal(format!("invalid Argon2id params: {e}")))?;
        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, key.as_mut())
            .map_err(|e| WalletError::Internal(format!("Argon2id key derivation failed: {e}")))?;
        Ok(key)
    }

    pub fn encrypt(&self, plaintext: &str, password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let key = self.derive_key(password, &salt)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
        let mut message = Zeroizing::new(Vec::with_capacity(MARKER.len() + plaintext.len()));
        message.extend_from_slice(MARKER);
        message.extend_from_slice(plaintext.as_bytes());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), message.as_slice())
            .map_err(|e| WalletError::Internal(format!("failed to encrypt secret: {e}")))?;

        let mut encoded = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + ciphertext.len());
        encoded.push(VERSION);
        encoded.extend_from_slice(&salt);
        encoded.extend_from_slice(&nonce);
        encoded.extend_from_slice(&ciphertext);
        Ok(hex::encode(encoded))
    }

    /// Any failure (bad hex, unknown version, tag mismatch, missing marker)
    /// is reported as `DecryptionError`.
    pub fn decrypt(&self, encoded: &str, password: &str) -> Result<Zeroizing<String>> {
        let raw = hex::decode(encoded).map_err(|_| WalletError::DecryptionError)?;
        if raw.len() < 1 + SALT_LEN + NONCE_LEN || raw[0] != VERSION {
            return Err(WalletError::DecryptionError);
        }
        let salt = &raw[1..1 + SALT_LEN];
        let nonce = &raw[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN];
        let ciphertext = &raw[1 + SALT_LEN + NONCE_LEN..];

        let key = self.derive_key(password, salt)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
        let mut message = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| WalletError::DecryptionError)?;
        if !message.starts_with(MARKER) {
            message.zeroize();
            return Err(WalletError::DecryptionError);
        }
        let text = String::from_utf8(message.split_off(MARKER.len()));
        message.zeroize();
        match text {
            Ok(s) => Ok(Zeroizing::new(s)),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(WalletError::DecryptionError)
            }
        }
    }
}

/// Decrypted seeds of unlocked wallets, keyed by wallet id. Ad-hoc private
/// keys live under `wallet_id:address`.
#[derive(Default)]
pub struct SeedStorage {
    inner: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl SeedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adhoc_key(wallet_id: &str, address: &str) -> String {
        format!("{wallet_id}:{address}")
    }

    pub fn get(&self, key: &str) -> Option<Zeroizing<String>> {
        self.inner.read().ok()?.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().map(|m| m.contains_key(key)).unwrap_or(false)
    }

    pub fn set(&self, key: impl Into<String>, secret: Zeroizing<String>) {
        if let Ok(mut m) = self.inner.write() {
            m.insert(key.into(), secret);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut m) = self.inner.write() {
            m.remove(key);
        }
    }

    /// Drop a wallet's seed and every ad-hoc key cached under it.
    pub fn remove_wallet(&self, wallet_id: &str) {
        if let Ok(mut m) = self.inner.write() {
            let prefix = format!("{wallet_id}:");
            m.retain(|k, _| k != wallet_id && !k.starts_with(&prefix));
        }
    }
}
