//! Sealing-key derivation.
//!
//! The at-rest key is stretched from the application secret with Argon2id.
//! The salt is not random: every process on a host has to arrive at the same
//! key without coordinating, so it is fixed per storage context instead.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of sealing keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// A symmetric sealing key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey {
    bytes: [u8; KEY_SIZE],
}

impl SealingKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generates a random key. Useful for throwaway stores.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for key derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Derives a deterministic salt from a context label.
    ///
    /// Different labels give unrelated keys for the same secret.
    #[must_use]
    pub fn from_context(context: &str) -> Self {
        let digest = Sha256::digest(context.as_bytes());
        let mut bytes = [0u8; SALT_SIZE];
        bytes.copy_from_slice(&digest[..SALT_SIZE]);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the salt bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP Argon2id baseline (19 MiB, t=2, p=1)
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and short-lived tooling. Not for production.
    #[must_use]
    pub fn light() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Derives a sealing key from `secret` using Argon2id.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if the parameters are rejected.
pub fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<SealingKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = SealingKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
