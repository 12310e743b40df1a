//! The MAC signing key.
//!
//! Supplied by the host at startup. Never serialized, logged or embedded in
//! an export; the bytes are wiped on drop.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use warden_contracts::error::{WardenError, WardenResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    bytes: Vec<u8>,
}

impl SigningKey {
    /// Shortest key accepted, in bytes.
    pub const MIN_LEN: usize = 16;

    pub fn new(bytes: impl Into<Vec<u8>>) -> WardenResult<Self> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            return Err(WardenError::ConfigError {
                reason: format!(
                    "signing key must be at least {} bytes, got {}",
                    Self::MIN_LEN,
                    bytes.len()
                ),
            });
        }
        Ok(Self { bytes })
    }

    pub fn from_hex(encoded: &str) -> WardenResult<Self> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| WardenError::ConfigError {
            reason: format!("signing key is not valid hex: {}", e),
        })?;
        Self::new(bytes)
    }

    /// HMAC-SHA256 of `message`, hex encoded.
    pub fn sign(&self, message: &[u8]) -> WardenResult<String> {
        Ok(hex::encode(self.mac_bytes(message)?))
    }

    /// Constant-time check of a hex MAC against `message`.
    ///
    /// Malformed hex is simply a mismatch.
    pub fn verify(&self, message: &[u8], mac_hex: &str) -> bool {
        let Ok(expected) = hex::decode(mac_hex) else {
            return false;
        };
        let Ok(actual) = self.mac_bytes(message) else {
            return false;
        };
        if expected.len() != actual.len() {
            return false;
        }
        expected.ct_eq(actual.as_slice()).into()
    }

    fn mac_bytes(&self, message: &[u8]) -> WardenResult<Vec<u8>> {
        let mut mac =
            HmacSha256::new_from_slice(&self.bytes).map_err(|e| WardenError::ConfigError {
                reason: format!("invalid signing key: {}", e),
            })?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey([REDACTED])")
    }
}
