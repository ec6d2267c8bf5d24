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


//! Interface to the content decryption primitive
//!
//! The primitive itself is an external collaborator: a pure function from
//! ciphertext bytes plus a key to plaintext bytes. The core only needs the
//! [`ContentDecryptor`] capability so the downloader can turn a finished
//! `.part` file into playable audio.

use crate::error::Result;

/// Key size used by the service's track cipher
pub const TRACK_KEY_LEN: usize = 16;

/// Per-track decryption capability.
///
/// `derive_key` must be deterministic in the track id; `decrypt` must be a
/// pure function of its inputs so that resumed downloads decrypt to the
/// same bytes as uninterrupted ones.
pub trait ContentDecryptor: Send + Sync {
    /// Derive the track key from the stable service track id
    fn derive_key(&self, track_id: &str) -> Result<[u8; TRACK_KEY_LEN]>;

    /// Decrypt the full ciphertext of one track
    fn decrypt(&self, ciphertext: &[u8], key: &[u8; TRACK_KEY_LEN]) -> Result<Vec<u8>>;
}

/// Identity decryptor for streams that are served unencrypted, and for
/// exercising the pipeline in tests.
#[derive(Debug, Default, Clone)]
pub struct PassthroughDecryptor;

impl ContentDecryptor for PassthroughDecryptor {
    fn derive_key(&self, _track_id: &str) -> Result<[u8; TRACK_KEY_LEN]> {
        Ok([0u8; TRACK_KEY_LEN])
    }

    fn decrypt(&self, ciphertext: &[u8], _key: &[u8; TRACK_KEY_LEN]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}
