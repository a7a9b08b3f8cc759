//! At-rest protection for Keyward license state.
//!
//! - [`SealingKey`] is derived once from the application secret with Argon2id.
//! - [`seal`] / [`open`] wrap ChaCha20-Poly1305 in a versioned, base64
//!   envelope. Associated data binds each envelope to the record it was
//!   written for, so a sealed file copied under another name fails to open.
//! - [`sha256_hex`] and [`constant_time_eq`] are the hashing helpers shared
//!   by fingerprinting and storage.

mod digest;
mod error;
mod key;
mod seal;

pub use digest::{constant_time_eq, sha256_hex};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, KdfParams, Salt, SealingKey, KEY_SIZE, SALT_SIZE};
pub use seal::{open, seal, ENVELOPE_PREFIX, NONCE_SIZE, TAG_SIZE};
