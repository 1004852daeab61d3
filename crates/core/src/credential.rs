//! Ephemeral credential values.
//!
//! These are produced by the vault and the provider adapters, held in memory
//! for the duration of one run, and never persisted in plaintext. Only their
//! effects (re-encrypted secrets, new expiry timestamps) reach the store.

use crate::types::Timestamp;

/// A decrypted, currently-valid access secret for one integration.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_secret: String,
    pub expires_at: Option<Timestamp>,
}

/// The result of a successful credential refresh at the provider.
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub access_secret: String,
    pub expires_at: Option<Timestamp>,
}
