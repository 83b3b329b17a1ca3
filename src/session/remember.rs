// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device-bound "remember me" blob.
//!
//! The secret is sealed with AES-256-GCM under a key that is never stored:
//! it is recomputed as `HMAC-SHA256(installation id, fingerprint factors)`
//! whenever the blob is opened. A different device (or installation) yields a
//! different key and the blob no longer opens.
//!
//! Stored form: `base64(JSON { "iv": [12 bytes], "data": [ciphertext || tag] })`.

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::aead::{open_raw, seal_raw};
use crate::crypto::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Environment factors the remember key is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    factors: Vec<String>,
}

impl DeviceFingerprint {
    pub fn new<I, S>(factors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            factors: factors.into_iter().map(Into::into).collect(),
        }
    }

    /// Operating system, architecture, host name and user of this process.
    pub fn from_environment() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .unwrap_or_default();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();

        Self::new([
            std::env::consts::OS.to_string(),
            std::env::consts::ARCH.to_string(),
            hostname,
            user,
        ])
    }

    fn key(&self, installation_id: &str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(installation_id.as_bytes())
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        for factor in &self.factors {
            mac.update(factor.as_bytes());
            mac.update(b"\n");
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&mac.finalize().into_bytes());
        Ok(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberBlob {
    pub iv: [u8; 12],
    pub data: Vec<u8>,
}

impl RememberBlob {
    pub fn seal(
        secret: &SecretString,
        fingerprint: &DeviceFingerprint,
        installation_id: &str,
    ) -> Result<Self, CryptoError> {
        let key = fingerprint.key(installation_id)?;
        let (iv, data) = seal_raw(&key, secret.expose_secret().as_bytes())?;
        Ok(Self { iv, data })
    }

    /// Recover the secret. Fails with `DecryptionFailed` on another device.
    pub fn open(
        &self,
        fingerprint: &DeviceFingerprint,
        installation_id: &str,
    ) -> Result<SecretString, CryptoError> {
        let key = fingerprint.key(installation_id)?;
        let plaintext = Zeroizing::new(open_raw(&key, self.iv, &self.data)?);
        let secret = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(SecretString::new(secret.to_string()))
    }

    pub fn encode(&self) -> Result<String, CryptoError> {
        let json = serde_json::to_vec(self).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        Ok(Base64::encode_string(&json))
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let json = Base64::decode_vec(encoded).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}
