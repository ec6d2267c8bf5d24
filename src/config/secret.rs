// Wavesink - Music Downloader for Deezer
// Copyright (C) 2025 Wavesink contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! ARL storage: never persisted in plaintext
//!
//! The OS credential store is preferred. Where no keyring backend is
//! usable (headless Linux, locked keychains), the token falls back to an
//! AES-256-GCM-encrypted file whose key is derived with PBKDF2 from a
//! stable machine identifier, written with 0600 permissions. Either way
//! the caller only sees `store_arl`/`load_arl`.

use crate::error::{Result, WavesinkError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const KEYRING_SERVICE: &str = "wavesink";
const KEYRING_USER: &str = "deezer-arl";
const ENC_FILE_NAME: &str = "arl.enc";
const ENC_FILE_VERSION: &str = "v1";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 150_000;

/// Store the ARL, preferring the OS credential store
pub fn store_arl(arl: &str) -> Result<()> {
    if arl.trim().is_empty() {
        return Err(WavesinkError::validation("arl is empty"));
    }

    match keyring_entry().and_then(|entry| entry.set_password(arl)) {
        Ok(()) => {
            tracing::info!(backend = "keyring", "stored arl");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(error = %err, "keyring unavailable, using encrypted file");
            store_encrypted_file(&arl_file_path(), arl, &machine_identifier())
        }
    }
}

/// Load the ARL from wherever it was stored
pub fn load_arl() -> Result<String> {
    match keyring_entry().and_then(|entry| entry.get_password()) {
        Ok(arl) => return Ok(arl),
        Err(keyring::Error::NoEntry) => {}
        Err(err) => {
            tracing::debug!(error = %err, "keyring read failed, trying encrypted file");
        }
    }

    let path = arl_file_path();
    if path.exists() {
        return load_encrypted_file(&path, &machine_identifier());
    }
    Err(WavesinkError::auth("no arl configured"))
}

/// Remove the stored credential from every backend
pub fn clear_arl() -> Result<()> {
    if let Ok(entry) = keyring_entry() {
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(err) => tracing::warn!(error = %err, "keyring delete failed"),
        }
    }
    let path = arl_file_path();
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

fn keyring_entry() -> std::result::Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
}

fn arl_file_path() -> PathBuf {
    super::data_dir().join(ENC_FILE_NAME)
}

/// Stable per-machine identifier the fallback key is derived from.
///
/// Not a secret by itself; it only ties the encrypted file to this
/// machine so a copied file is useless elsewhere.
fn machine_identifier() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }

    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "wavesink-host".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{host}\x00{user}").as_bytes());
    hex::encode(digest)
}

fn derive_key(machine_id: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(machine_id.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

fn store_encrypted_file(path: &Path, arl: &str, machine_id: &str) -> Result<()> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(machine_id, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| WavesinkError::internal(format!("cipher init: {e}")))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), arl.as_bytes())
        .map_err(|e| WavesinkError::internal(format!("arl encrypt: {e}")))?;

    let body = format!(
        "{ENC_FILE_VERSION}${}${}${}",
        hex::encode(salt),
        hex::encode(nonce),
        hex::encode(ciphertext)
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(backend = "file", "stored arl");
    Ok(())
}

fn load_encrypted_file(path: &Path, machine_id: &str) -> Result<String> {
    let body = std::fs::read_to_string(path)?;
    let parts: Vec<&str> = body.trim().split('$').collect();
    if parts.len() != 4 || parts[0] != ENC_FILE_VERSION {
        return Err(WavesinkError::validation("malformed arl file"));
    }

    let salt = hex::decode(parts[1])
        .map_err(|e| WavesinkError::validation(format!("arl file salt: {e}")))?;
    let nonce = hex::decode(parts[2])
        .map_err(|e| WavesinkError::validation(format!("arl file nonce: {e}")))?;
    let ciphertext = hex::decode(parts[3])
        .map_err(|e| WavesinkError::validation(format!("arl file body: {e}")))?;
    if nonce.len() != NONCE_LEN {
        return Err(WavesinkError::validation("malformed arl nonce"));
    }

    let key = derive_key(machine_id, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| WavesinkError::internal(format!("cipher init: {e}")))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| WavesinkError::Decryption("arl file does not belong to this machine".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| WavesinkError::validation("arl file is not valid utf-8"))
}
