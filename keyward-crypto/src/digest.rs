//! Hashing and comparison helpers.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Returns the lowercase hex SHA-256 of `data` (always 64 characters).
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compares two byte strings without an early exit on the first difference.
///
/// Length is not secret: inputs of different length compare unequal
/// immediately.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
