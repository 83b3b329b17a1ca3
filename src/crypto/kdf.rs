// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key derivation from the user's PIN.
//!
//! Two values are derived from the (NFKC-normalised) secret:
//!
//! - **Namespace**: `pinvault_<24 hex>` from SHA-256 over the installation salt
//!   and the secret. It names the user's storage partition and cannot be
//!   reversed to the secret.
//! - **Content key**: PBKDF2-HMAC-SHA256 (at least 100 000 iterations) over the
//!   secret with a random 32-byte per-user salt. The salt is persisted in
//!   device storage under a key derived from a hash of the secret, so the same
//!   secret always finds the same salt again.
//!
//! ## Persisted Keys
//!
//! | Key | Value |
//! |-----|-------|
//! | `pinvault.installation.salt` | 32 random bytes, hex |
//! | `pinvault.installation.id` | UUID v4 |
//! | `pinvault.field.salt.<16 hex>` | JSON array of 32 byte values |

use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};

use ring::pbkdf2;
use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use super::{random_array, CryptoError};
use crate::storage::kv::KeyValueStore;

// =============================================================================
// Constants
// =============================================================================

/// Prefix of every namespace identifier.
pub const NAMESPACE_PREFIX: &str = "pinvault";

/// Number of hex characters of the digest kept in a namespace identifier.
pub const NAMESPACE_HEX_LEN: usize = 24;

/// Lower bound on PBKDF2 iterations; configured values below it are raised.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

pub const INSTALLATION_SALT_KEY: &str = "pinvault.installation.salt";
pub const INSTALLATION_ID_KEY: &str = "pinvault.installation.id";

const USER_SALT_KEY_PREFIX: &str = "pinvault.field.salt.";
const SECRET_HASH_DOMAIN: &str = "pinvault-secret-hash-v1:";
const CONTENT_KEY_DOMAIN: &str = "-field-encryption-v2";
const SALT_LEN: usize = 32;

/// Normalise a raw PIN to NFKC so visually identical input derives the same keys.
pub fn normalize_secret(raw: &str) -> SecretString {
    SecretString::new(raw.nfkc().collect())
}

// =============================================================================
// Namespace
// =============================================================================

/// Storage partition identifier derived from a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    fn from_digest(digest: &[u8]) -> Self {
        let hex = hex::encode(digest);
        Self(format!("{NAMESPACE_PREFIX}_{}", &hex[..NAMESPACE_HEX_LEN]))
    }

    /// Accept a previously derived identifier, rejecting anything that could
    /// escape a directory when used as a file name.
    pub fn parse(raw: &str) -> Option<Self> {
        let hex = raw.strip_prefix(NAMESPACE_PREFIX)?.strip_prefix('_')?;
        let valid = hex.len() == NAMESPACE_HEX_LEN
            && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Content Key
// =============================================================================

/// 256-bit AES key for record content. Wiped from memory on drop.
#[derive(Clone)]
pub struct ContentKey(Zeroizing<[u8; 32]>);

impl ContentKey {
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub(crate) fn expose(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(<redacted>)")
    }
}

// =============================================================================
// KeyDerivation
// =============================================================================

/// Derives namespaces and content keys, persisting salts in device storage.
pub struct KeyDerivation {
    persisted: Arc<dyn KeyValueStore>,
    iterations: NonZeroU32,
    /// Serialises get-or-create of salts so concurrent first logins agree.
    salt_lock: Mutex<()>,
}

impl KeyDerivation {
    pub fn new(persisted: Arc<dyn KeyValueStore>, iterations: u32) -> Self {
        let iterations = NonZeroU32::new(iterations.max(MIN_KDF_ITERATIONS))
            .unwrap_or(NonZeroU32::MIN);
        Self {
            persisted,
            iterations,
            salt_lock: Mutex::new(()),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// Deterministic, non-reversible namespace for `secret` on this installation.
    pub fn namespace_id(&self, secret: &SecretString) -> Result<Namespace, CryptoError> {
        let salt = self.installation_salt()?;
        let mut hasher = Sha256::new();
        hasher.update(&salt[..]);
        hasher.update(b":");
        hasher.update(secret.expose_secret().as_bytes());
        Ok(Namespace::from_digest(&hasher.finalize()))
    }

    /// PBKDF2 content key for `secret`. Creates the per-user salt on first use.
    ///
    /// This is deliberately slow; call it off the async executor.
    pub fn content_key(&self, secret: &SecretString) -> Result<ContentKey, CryptoError> {
        let salt = self.user_salt(secret)?;
        let mut password = Zeroizing::new(secret.expose_secret().clone());
        password.push_str(CONTENT_KEY_DOMAIN);

        let mut out = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            &salt[..],
            password.as_bytes(),
            &mut out,
        );
        let key = ContentKey::from_bytes(out);
        out.fill(0);
        Ok(key)
    }

    /// Random per-installation salt, created on first use.
    pub fn installation_salt(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let encoded = self.get_or_create(INSTALLATION_SALT_KEY, || {
            Ok(hex::encode(&random_array::<SALT_LEN>()?[..]))
        })?;
        hex::decode(encoded)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::KeyDerivationFailed("corrupt installation salt".into()))
    }

    /// Random per-installation identifier, created on first use.
    pub fn installation_id(&self) -> Result<String, CryptoError> {
        self.get_or_create(INSTALLATION_ID_KEY, || Ok(uuid::Uuid::new_v4().to_string()))
    }

    /// Create any missing salts for `secret` and return its namespace.
    pub fn warm(&self, secret: &SecretString) -> Result<Namespace, CryptoError> {
        let namespace = self.namespace_id(secret)?;
        self.user_salt(secret)?;
        Ok(namespace)
    }

    fn user_salt(&self, secret: &SecretString) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let key = format!("{USER_SALT_KEY_PREFIX}{}", secret_hash(secret));
        let encoded = self.get_or_create(&key, || {
            let salt = random_array::<SALT_LEN>()?;
            serde_json::to_string(&salt.to_vec())
                .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
        })?;

        let salt: Vec<u8> = serde_json::from_str(&encoded)
            .map_err(|_| CryptoError::KeyDerivationFailed("corrupt per-user salt".into()))?;
        if salt.len() != SALT_LEN {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "per-user salt has {} bytes, expected {SALT_LEN}",
                salt.len()
            )));
        }
        Ok(Zeroizing::new(salt))
    }

    fn get_or_create(
        &self,
        key: &str,
        create: impl FnOnce() -> Result<String, CryptoError>,
    ) -> Result<String, CryptoError> {
        let _guard = self.salt_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self
            .persisted
            .get(key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        if let Some(value) = existing {
            return Ok(value);
        }

        let value = create()?;
        self.persisted
            .set(key, &value)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(value)
    }
}

/// Short hash of the secret used only to locate its salt.
fn secret_hash(secret: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SECRET_HASH_DOMAIN.as_bytes());
    hasher.update(secret.expose_secret().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKeyValueStore;

    fn kdf() -> (Arc<MemoryKeyValueStore>, KeyDerivation) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let kdf = KeyDerivation::new(store.clone(), MIN_KDF_ITERATIONS);
        (store, kdf)
    }

    fn pin(raw: &str) -> SecretString {
        normalize_secret(raw)
    }

    #[test]
    fn namespace_is_deterministic_and_well_formed() {
        let (_, kdf) = kdf();
        let a = kdf.namespace_id(&pin("1234")).unwrap();
        let b = kdf.namespace_id(&pin("1234")).unwrap();
        assert_eq!(a, b);

        let hex = a.as_str().strip_prefix("pinvault_").unwrap();
        assert_eq!(hex.len(), NAMESPACE_HEX_LEN);
        assert!(!a.as_str().contains("1234"));
        assert_eq!(Namespace::parse(a.as_str()), Some(a));
    }

    #[test]
    fn different_secrets_get_different_namespaces() {
        let (_, kdf) = kdf();
        let a = kdf.namespace_id(&pin("1234")).unwrap();
        let b = kdf.namespace_id(&pin("5678")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn installations_do_not_share_namespaces() {
        let (_, first) = kdf();
        let (_, second) = kdf();
        assert_ne!(
            first.namespace_id(&pin("1234")).unwrap(),
            second.namespace_id(&pin("1234")).unwrap()
        );
    }

    #[test]
    fn nfkc_equivalent_pins_match() {
        let (_, kdf) = kdf();
        let ascii = kdf.namespace_id(&pin("1234")).unwrap();
        let fullwidth = kdf.namespace_id(&pin("\u{ff11}\u{ff12}\u{ff13}\u{ff14}")).unwrap();
        assert_eq!(ascii, fullwidth);
    }

    #[test]
    fn content_key_is_stable_across_instances() {
        let (store, first) = kdf();
        let key_a = first.content_key(&pin("1234")).unwrap();

        let second = KeyDerivation::new(store, MIN_KDF_ITERATIONS);
        let key_b = second.content_key(&pin("1234")).unwrap();
        assert_eq!(key_a.expose(), key_b.expose());

        let other = second.content_key(&pin("9999")).unwrap();
        assert_ne!(key_a.expose(), other.expose());
    }

    #[test]
    fn user_salt_is_persisted_as_json_bytes() {
        let (store, kdf) = kdf();
        kdf.content_key(&pin("1234")).unwrap();

        let key = format!("{USER_SALT_KEY_PREFIX}{}", secret_hash(&pin("1234")));
        let raw = store.get(&key).unwrap().unwrap();
        let salt: Vec<u8> = serde_json::from_str(&raw).unwrap();
        assert_eq!(salt.len(), SALT_LEN);
    }

    #[test]
    fn warm_creates_both_salts() {
        let (store, kdf) = kdf();
        let namespace = kdf.warm(&pin("4471")).unwrap();
        assert_eq!(namespace, kdf.namespace_id(&pin("4471")).unwrap());

        assert!(store.get(INSTALLATION_SALT_KEY).unwrap().is_some());
        let key = format!("{USER_SALT_KEY_PREFIX}{}", secret_hash(&pin("4471")));
        assert!(store.get(&key).unwrap().is_some());
    }

    #[test]
    fn corrupt_salt_fails_derivation() {
        let (store, kdf) = kdf();
        let key = format!("{USER_SALT_KEY_PREFIX}{}", secret_hash(&pin("1234")));
        store.set(&key, "[1,2,3]").unwrap();

        let err = kdf.content_key(&pin("1234")).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivationFailed(_)));
    }

    #[test]
    fn iterations_never_drop_below_minimum() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let kdf = KeyDerivation::new(store, 10);
        assert_eq!(kdf.iterations(), MIN_KDF_ITERATIONS);
    }

    #[test]
    fn namespace_parse_rejects_path_tricks() {
        assert!(Namespace::parse("pinvault_../../etc/passwd").is_none());
        assert!(Namespace::parse("other_0123456789abcdef01234567").is_none());
        assert!(Namespace::parse("pinvault_0123456789ABCDEF01234567").is_none());
    }

    #[test]
    fn content_key_debug_is_redacted() {
        let key = ContentKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "ContentKey(<redacted>)");
    }
}
