//! Key generation and hashing
//!
//! Secrets look like `{prefix}_{base64url(random bytes)}`. Only a hash of the full
//! secret is stored: `sha256$<b64>` or, when a server-wide secret is configured,
//! `hmac-sha256$<b64>`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::domain::key::{validate_byte_length, validate_prefix, KeyValidationError};
use crate::domain::DomainError;

type HmacSha256 = Hmac<Sha256>;

/// Characters of the random part kept in a key's visible `start`
const START_CHARS: usize = 4;

/// A freshly generated secret and what gets stored about it
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// The plaintext secret, returned to the caller once
    pub key: String,
    pub start: String,
    pub hash: String,
}

/// Hashes key secrets, optionally keyed with a server-wide pepper
#[derive(Clone)]
pub struct KeyHasher {
    mac: Option<HmacSha256>,
}

impl std::fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHasher")
            .field("keyed", &self.mac.is_some())
            .finish()
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::sha256()
    }
}

impl KeyHasher {
    pub fn sha256() -> Self {
        Self { mac: None }
    }

    pub fn hmac(secret: &str) -> Result<Self, DomainError> {
        if secret.is_empty() {
            return Err(DomainError::configuration("keys.hash_secret cannot be empty"));
        }

        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| DomainError::configuration(format!("Invalid hash secret: {}", e)))?;

        Ok(Self { mac: Some(mac) })
    }

    /// Build from the optional configured secret
    pub fn from_secret(secret: Option<&str>) -> Result<Self, DomainError> {
        match secret {
            Some(secret) => Self::hmac(secret),
            None => Ok(Self::sha256()),
        }
    }

    pub fn hash(&self, key: &str) -> String {
        match &self.mac {
            Some(mac) => {
                let mut mac = mac.clone();
                mac.update(key.as_bytes());
                format!(
                    "hmac-sha256${}",
                    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
                )
            }
            None => {
                let digest = Sha256::digest(key.as_bytes());
                format!("sha256${}", URL_SAFE_NO_PAD.encode(digest))
            }
        }
    }

    pub fn verify(&self, key: &str, stored_hash: &str) -> bool {
        constant_time_eq(self.hash(key).as_bytes(), stored_hash.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Visible part of a secret: everything up to the prefix separator plus a few characters
fn visible_start(key: &str) -> String {
    let prefix_chars = key.find('_').map(|pos| key[..=pos].chars().count()).unwrap_or(0);
    key.chars().take(prefix_chars + START_CHARS).collect()
}

/// Generates random key secrets
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    hasher: KeyHasher,
}

impl KeyGenerator {
    pub fn new(hasher: KeyHasher) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &KeyHasher {
        &self.hasher
    }

    /// Generate a new secret; an empty prefix produces a bare random string
    pub fn generate(&self, prefix: &str, byte_length: usize) -> Result<GeneratedKey, KeyValidationError> {
        validate_prefix(prefix)?;
        validate_byte_length(byte_length)?;

        let mut random_bytes = vec![0u8; byte_length];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let encoded = URL_SAFE_NO_PAD.encode(&random_bytes);

        // base64url output is ASCII, so slicing by byte is safe
        let visible = &encoded[..START_CHARS];
        let (key, start) = if prefix.is_empty() {
            (encoded.clone(), visible.to_string())
        } else {
            (format!("{}_{}", prefix, encoded), format!("{}_{}", prefix, visible))
        };

        Ok(GeneratedKey {
            hash: self.hasher.hash(&key),
            key,
            start,
        })
    }

    /// Wrap a caller-chosen secret, used for bootstrap keys and tests
    pub fn from_secret(&self, secret: &str) -> GeneratedKey {
        GeneratedKey {
            key: secret.to_string(),
            start: visible_start(secret),
            hash: self.hasher.hash(secret),
        }
    }
}
