//! Optional at-rest encryption of snapshot bytes.
//!
//! When a key file is present every snapshot is sealed with
//! ChaCha20-Poly1305 (random 96-bit nonce prepended to the ciphertext).
//! Without a key the cipher is a passthrough, so callers never need to
//! know which mode is active.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::error::AppError;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct SnapshotCipher {
    cipher: Option<ChaCha20Poly1305>,
}

impl std::fmt::Debug for SnapshotCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCipher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl SnapshotCipher {
    /// Passthrough cipher: bytes are stored and read unchanged.
    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Build from raw 32-byte key material.
    pub fn from_key(key: &[u8]) -> Result<Self, AppError> {
        if key.len() != KEY_LEN {
            return Err(AppError::ConfigError(format!(
                "Encryption key must be {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| AppError::ConfigError(format!("Invalid encryption key: {e}")))?;
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    /// Load a base64 key file. A missing file disables encryption.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let encoded = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No key file, snapshots stored unencrypted");
                return Ok(Self::disabled());
            }
            Err(e) => {
                return Err(AppError::ConfigError(format!(
                    "Failed to read key file {}: {e}",
                    path.display()
                )));
            }
        };

        let key = STANDARD.decode(encoded.trim()).map_err(|e| {
            AppError::ConfigError(format!("Key file {} is not base64: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Snapshot encryption enabled");
        Self::from_key(&key)
    }

    /// Write a fresh random key to `path`. Refuses to overwrite.
    pub fn generate_key_file(path: &Path) -> Result<(), AppError> {
        use std::io::Write;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::StorageError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                AppError::StorageError(format!("Failed to create key file {}: {e}", path.display()))
            })?;
        writeln!(file, "{}", STANDARD.encode(key)).map_err(|e| {
            AppError::StorageError(format!("Failed to write key file {}: {e}", path.display()))
        })?;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_vec());
        };
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AppError::StorageError(format!("Encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, AppError> {
        let Some(cipher) = &self.cipher else {
            return Ok(data.to_vec());
        };
        if data.len() < NONCE_LEN {
            return Err(AppError::DecryptionError(format!(
                "ciphertext too short ({} bytes)",
                data.len()
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::DecryptionError("authentication tag mismatch".into()))
    }
}
