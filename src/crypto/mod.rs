// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptographic primitives for the vault.
//!
//! - [`kdf`] - namespace identifiers, per-user salts and PBKDF2 content keys
//! - [`aead`] - AES-256-GCM sealing of record content and outbox payloads
//!
//! All randomness comes from `ring::rand::SystemRandom`.

pub mod aead;
pub mod kdf;

use ring::rand::{SecureRandom, SystemRandom};
use secrecy::zeroize::Zeroizing;

pub use aead::{open, seal};
pub use kdf::{normalize_secret, ContentKey, KeyDerivation, Namespace};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("system randomness unavailable")]
    Randomness,
}

/// Fill `buf` from the system CSPRNG.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| CryptoError::Randomness)
}

/// Fresh random bytes held in a buffer that is wiped on drop.
pub(crate) fn random_array<const N: usize>() -> Result<Zeroizing<[u8; N]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; N]);
    fill_random(&mut out[..])?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_arrays_differ() {
        let a = random_array::<32>().unwrap();
        let b = random_array::<32>().unwrap();
        assert_ne!(*a, *b);
    }
}
