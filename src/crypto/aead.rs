// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM sealing.
//!
//! Sealed values are `base64(nonce || ciphertext || tag)` with a fresh
//! 96-bit nonce per call.

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use super::{fill_random, CryptoError, ContentKey};

/// Encrypt `plaintext` under `key`, returning the base64 envelope.
pub fn seal(key: &ContentKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let (nonce, ciphertext) = seal_raw(key.expose(), plaintext)?;
    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(Base64::encode_string(&envelope))
}

/// Decrypt an envelope produced by [`seal`].
pub fn open(key: &ContentKey, encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let envelope =
        Base64::decode_vec(encoded).map_err(|e| CryptoError::Malformed(e.to_string()))?;
    if envelope.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(CryptoError::Malformed("envelope too short".into()));
    }
    let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce);
    open_raw(key.expose(), nonce_bytes, ciphertext)
}

/// Encrypt with a raw key, returning the nonce and `ciphertext || tag`.
pub(crate) fn seal_raw(
    key: &[u8; 32],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let key = less_safe_key(key)?;
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok((nonce, in_out))
}

/// Decrypt `ciphertext || tag` with a raw key.
pub(crate) fn open_raw(
    key: &[u8; 32],
    nonce: [u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = less_safe_key(key)?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(plaintext.to_vec())
}

fn less_safe_key(key: &[u8; 32]) -> Result<LessSafeKey, CryptoError> {
    UnboundKey::new(&AES_256_GCM, key)
        .map(LessSafeKey::new)
        .map_err(|_| CryptoError::EncryptionFailed)
}
