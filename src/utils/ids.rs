//! Identifiers and hashing.
//!
//! - [`Address`]: an account on the lending domain (users, senders, custody)
//! - [`MarketId`]: a lending market (one token pair)
//! - [`AssetId`]: a fungible token
//! - [`Hash`]: SHA-256 digest used for event fingerprints
//!
//! Identifiers are 20 bytes and serialize as `0x`-prefixed lowercase hex.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};

/// Length of an account, market or asset identifier in bytes
pub const ID_LENGTH: usize = 20;

/// Length of a hash in bytes
pub const HASH_LENGTH: usize = 32;

fn decode_hex(name: &str, s: &str, expected: usize) -> Result<Vec<u8>> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| Error::InvalidParameter {
        name: name.into(),
        reason: e.to_string(),
    })?;
    if bytes.len() != expected {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: format!("expected {} bytes, got {}", expected, bytes.len()),
        });
    }
    Ok(bytes)
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; ID_LENGTH]);

        impl $name {
            /// Create from raw bytes
            pub const fn new(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Derive a stable identifier from a human-readable label
            pub fn derive(label: &str) -> Self {
                let digest = Hash::sha256(label.as_bytes());
                let mut bytes = [0u8; ID_LENGTH];
                bytes.copy_from_slice(&digest.as_bytes()[HASH_LENGTH - ID_LENGTH..]);
                Self(bytes)
            }

            /// Parse from hex, with or without a `0x` prefix
            pub fn from_hex(s: &str) -> Result<Self> {
                let bytes = decode_hex($label, s, ID_LENGTH)?;
                let mut arr = [0u8; ID_LENGTH];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }

            /// `0x`-prefixed hex
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the identifier as bytes
            pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
                &self.0
            }

            /// Short form for logs
            pub fn short(&self) -> String {
                format!("0x{}", hex::encode(&self.0[..4]))
            }

            /// All-zero identifier
            pub fn zero() -> Self {
                Self([0u8; ID_LENGTH])
            }

            /// Check if identifier is all zeros
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; ID_LENGTH]
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

define_id!(
    /// Account address on the lending domain
    Address,
    "address"
);

define_id!(
    /// Lending market identifier
    MarketId,
    "market"
);

define_id!(
    /// Fungible token identifier
    AssetId,
    "asset"
);

// ═══════════════════════════════════════════════════════════════════════════════
// HASH
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash([u8; HASH_LENGTH]);

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Hash {
    /// Compute SHA256 hash of data
    pub fn sha256(data: &[u8]) -> Self {
        let result = Sha256::digest(data);
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = decode_hex("hash", s, HASH_LENGTH)?;
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check if hash is zero
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
