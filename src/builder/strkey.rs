//! Account id and seed encoding (`G...` / `S...` strkeys).
//!
//! Thin layer over `stellar-strkey` that keeps the rest of the crate on raw
//! 32-byte keys and a typed error.

use stellar_strkey::ed25519::{PrivateKey, PublicKey};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrKeyError {
    #[error("'{0}' is not a valid account id")]
    AccountId(String),
    #[error("not a valid secret seed")]
    Seed,
}

pub fn encode_account_id(key: &[u8; 32]) -> String {
    PublicKey(*key).to_string()
}

pub fn decode_account_id(s: &str) -> Result<[u8; 32], StrKeyError> {
    PublicKey::from_string(s)
        .map(|key| key.0)
        .map_err(|_| StrKeyError::AccountId(s.to_string()))
}

pub fn encode_seed(seed: &[u8; 32]) -> String {
    PrivateKey(*seed).to_string()
}

/// The error never echoes the input; it is a secret.
pub fn decode_seed(s: &str) -> Result<[u8; 32], StrKeyError> {
    PrivateKey::from_string(s).map(|key| key.0).map_err(|_| StrKeyError::Seed)
}
