//! License tokens: PASETO v4.public codec, claims, and validation.

mod claims;
pub mod paseto;
mod validator;

pub use claims::{LicenseClaims, LicenseInfo, UNLIMITED_USAGES};
pub use validator::TokenValidator;
