//! Encryption of OAuth secrets at rest.
//!
//! Ciphertexts are colon-separated hex fields with a leading version tag.
//! Current writes always produce the `v2` AES-256-GCM format:
//!
//! ```text
//! v2:<iv-hex>:<auth-tag-hex>:<ciphertext-hex>
//! ```
//!
//! Decryption dispatches on the tag and also accepts the two untagged
//! formats that predate versioning: three fields is GCM (with either a 12 or
//! 16 byte IV), two fields is the original AES-256-CBC scheme. Tampered or
//! malformed input fails with [`CryptoError`]; garbage is never returned.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::AesGcm;
use rand::RngCore;

type Aes256Gcm = AesGcm<aes::Aes256, U12>;
/// Pre-versioning GCM writes used a 16-byte IV.
type Aes256GcmLongIv = AesGcm<aes::Aes256, U16>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Development fallback key. Never use in production.
const DEV_KEY: &[u8; 32] = b"dev-key-32-bytes-123456789012345";

/// Errors from secret encryption/decryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The configured key is not exactly 32 bytes.
    #[error("Encryption key must be 32 bytes")]
    InvalidKey,

    /// The ciphertext does not match any known wire format.
    #[error("Invalid ciphertext format: {0}")]
    Format(String),

    /// Authentication failed: wrong key or tampered data.
    #[error("Decryption failed (wrong key or tampered data)")]
    Decrypt,

    /// The cipher rejected the encryption input.
    #[error("Encryption failed")]
    Encrypt,
}

/// Encrypts and decrypts integration secrets with a single 32-byte key.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Create a cipher from raw key material.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Load the key from the `ENCRYPTION_KEY` env var (64 hex chars).
    ///
    /// Falls back to a fixed development key when the variable is missing or
    /// malformed, with a loud warning.
    pub fn from_env() -> Self {
        if let Ok(raw) = std::env::var("ENCRYPTION_KEY") {
            if let Some(bytes) = hex::decode(raw.trim()) {
                if let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) {
                    return Self::new(key);
                }
            }
            tracing::warn!("ENCRYPTION_KEY is not 64 hex chars; using development key");
        } else {
            tracing::warn!("ENCRYPTION_KEY not set; using development key. DO NOT use in production");
        }
        Self::new(*DEV_KEY)
    }

    /// Encrypt a plaintext secret into the current `v2` GCM format.
    ///
    /// A fresh random IV is drawn per call, so encrypting the same plaintext
    /// twice yields different ciphertexts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKey)?;

        let mut iv = [0u8; 12];
        rand::rng().fill_bytes(&mut iv);

        // The aead API returns ciphertext with the tag appended; the wire
        // format stores them as separate fields.
        let sealed = cipher
            .encrypt((&iv).into(), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let split = sealed.len() - TAG_LEN;
        let (ct, tag) = sealed.split_at(split);

        Ok(format!(
            "v2:{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ct)
        ))
    }

    /// Decrypt a ciphertext in any supported format.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let parts: Vec<&str> = ciphertext.split(':').collect();
        match parts.as_slice() {
            ["v2", iv, tag, ct] => self.decrypt_gcm(iv, tag, ct),
            ["v1", iv, ct] => self.decrypt_cbc(iv, ct),
            // Untagged legacy forms: field count decides the scheme.
            [iv, tag, ct] => self.decrypt_gcm(iv, tag, ct),
            [iv, ct] => self.decrypt_cbc(iv, ct),
            _ => Err(CryptoError::Format(format!(
                "expected 2-4 colon-separated fields, got {}",
                parts.len()
            ))),
        }
    }

    fn decrypt_gcm(&self, iv_hex: &str, tag_hex: &str, ct_hex: &str) -> Result<String, CryptoError> {
        let iv = decode_field(iv_hex, "iv")?;
        let tag = decode_field(tag_hex, "auth tag")?;
        let mut sealed = decode_field(ct_hex, "ciphertext")?;
        if tag.len() != TAG_LEN {
            return Err(CryptoError::Format("auth tag must be 16 bytes".into()));
        }
        sealed.extend_from_slice(&tag);

        let plaintext = match iv.len() {
            12 => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|_| CryptoError::InvalidKey)?
                .decrypt(aes_gcm::Nonce::from_slice(&iv), sealed.as_ref())
                .map_err(|_| CryptoError::Decrypt)?,
            16 => Aes256GcmLongIv::new_from_slice(&self.key)
                .map_err(|_| CryptoError::InvalidKey)?
                .decrypt(aes_gcm::Nonce::from_slice(&iv), sealed.as_ref())
                .map_err(|_| CryptoError::Decrypt)?,
            n => {
                return Err(CryptoError::Format(format!(
                    "GCM iv must be 12 or 16 bytes, got {n}"
                )))
            }
        };

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }

    fn decrypt_cbc(&self, iv_hex: &str, ct_hex: &str) -> Result<String, CryptoError> {
        let iv = decode_field(iv_hex, "iv")?;
        if iv.len() != 16 {
            return Err(CryptoError::Format("CBC iv must be 16 bytes".into()));
        }
        let ct = decode_field(ct_hex, "ciphertext")?;

        let plaintext = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|_| CryptoError::InvalidKey)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ct)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

fn decode_field(field: &str, name: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(field).ok_or_else(|| CryptoError::Format(format!("{name} is not valid hex")))
}

// ---------------------------------------------------------------------------
// hex helpers (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Decode a hex string; `None` on odd length or non-hex chars.
    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    fn cipher() -> SecretCipher {
        SecretCipher::new(*DEV_KEY)
    }

    /// Produce a legacy untagged CBC ciphertext (the original scheme).
    fn legacy_cbc(plaintext: &str) -> String {
        let iv = [7u8; 16];
        let ct = Aes256CbcEnc::new_from_slices(DEV_KEY, &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        format!("{}:{}", hex::encode(iv), hex::encode(ct))
    }

    /// Produce a legacy untagged GCM ciphertext with a 16-byte IV.
    fn legacy_gcm_long_iv(plaintext: &str) -> String {
        let iv = [9u8; 16];
        let sealed = Aes256GcmLongIv::new_from_slice(DEV_KEY)
            .unwrap()
            .encrypt((&iv).into(), plaintext.as_bytes())
            .unwrap();
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(ct))
    }

    // -- Round trips -------------------------------------------------------

    #[test]
    fn encrypt_decrypt_round_trips() {
        let c = cipher();
        let ct = c.encrypt("ya29.secret-token").unwrap();
        assert_eq!(c.decrypt(&ct).unwrap(), "ya29.secret-token");
    }

    #[test]
    fn new_writes_are_v2_tagged() {
        let ct = cipher().encrypt("x").unwrap();
        assert!(ct.starts_with("v2:"));
        assert_eq!(ct.split(':').count(), 4);
    }

    #[test]
    fn encryption_is_not_deterministic_per_call() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    // -- Legacy formats ----------------------------------------------------

    #[test]
    fn legacy_cbc_two_part_format_decrypts() {
        let ct = legacy_cbc("old refresh token");
        assert_eq!(cipher().decrypt(&ct).unwrap(), "old refresh token");
    }

    #[test]
    fn legacy_untagged_gcm_with_long_iv_decrypts() {
        let ct = legacy_gcm_long_iv("old access token");
        assert_eq!(cipher().decrypt(&ct).unwrap(), "old access token");
    }

    // -- Failure modes -----------------------------------------------------

    #[test]
    fn tampered_ciphertext_fails_loudly() {
        let c = cipher();
        let ct = c.encrypt("secret").unwrap();
        // Flip a hex digit inside the ciphertext field.
        let mut tampered = ct.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(c.decrypt(&tampered), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn wrong_key_fails_loudly() {
        let ct = cipher().encrypt("secret").unwrap();
        let other = SecretCipher::new([42u8; 32]);
        assert!(matches!(other.decrypt(&ct), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn malformed_input_is_a_format_error() {
        let c = cipher();
        assert!(matches!(c.decrypt("not-hex-at-all"), Err(CryptoError::Format(_))));
        assert!(matches!(c.decrypt("a:b:c:d:e"), Err(CryptoError::Format(_))));
        assert!(matches!(c.decrypt("zz:zz"), Err(CryptoError::Format(_))));
    }
}
