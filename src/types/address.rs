//! Account and contract addresses on account-based ledgers.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 20-byte ledger address (EVM layout).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address, used as the caller when estimating without a sender
    pub const ZERO: Self = Self([0u8; 20]);

    /// Create an address from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Generate a random address (simulated ledgers only)
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Convert to hex string with 0x prefix
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex string (with or without 0x prefix)
    ///
    /// # Errors
    /// Returns error if hex is invalid or wrong length
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| AddressError::InvalidHex)?;

        if bytes.len() != 20 {
            return Err(AddressError::InvalidLength(bytes.len()));
        }

        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Left-pad into a 32-byte ABI word
    #[must_use]
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Address parsing errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AddressError {
    /// Invalid hex encoding
    #[error("invalid hex encoding")]
    InvalidHex,
    /// Invalid address length
    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),
}
