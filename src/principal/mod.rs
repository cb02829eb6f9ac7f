//! Principal codec: algorithm-tagged public key identifiers.
//!
//! A principal is the packed binary form `<multicodec varint><raw public key>`.
//! Its text form is multibase base58btc, which always starts with `z`.

use base58::{FromBase58, ToBase58};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::PrincipalError;

/// Multicodec varint prefix for an Ed25519 public key (0xED).
pub const ED25519_PUB_PREFIX: [u8; 2] = [0xED, 0x01];

/// Multicodec varint prefix for a compressed P-256 public key (0x1200).
pub const P256_PUB_PREFIX: [u8; 2] = [0x80, 0x24];

/// Raw Ed25519 public key size.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Packed Ed25519 principal size: 2-byte tag + 32-byte key.
pub const ED25519_PRINCIPAL_SIZE: usize = ED25519_PUB_PREFIX.len() + ED25519_PUBLIC_KEY_SIZE;

/// Multibase prefix for base58btc.
pub const MULTIBASE_BASE58BTC: char = 'z';

/// Packed binary public key with its algorithm tag.
///
/// Equality is byte-wise. Values deserialized from a blob are kept as-is so that
/// signature verification can reject unknown algorithms without a decode error.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(Vec<u8>);

impl Principal {
    /// Pack a raw Ed25519 public key.
    pub fn from_ed25519(public_key: &[u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(ED25519_PRINCIPAL_SIZE);
        bytes.extend_from_slice(&ED25519_PUB_PREFIX);
        bytes.extend_from_slice(public_key);
        Principal(bytes)
    }

    /// Validate and wrap packed principal bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrincipalError> {
        if bytes.len() < ED25519_PUB_PREFIX.len() || bytes[..2] != ED25519_PUB_PREFIX {
            return Err(PrincipalError::InvalidMulticodec);
        }
        if bytes.len() != ED25519_PRINCIPAL_SIZE {
            return Err(PrincipalError::InvalidLength {
                expected: ED25519_PRINCIPAL_SIZE,
                got: bytes.len(),
            });
        }
        Ok(Principal(bytes.to_vec()))
    }

    /// Wrap bytes without validation. Used for values read off the wire.
    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Principal(bytes)
    }

    /// Multibase base58btc text form.
    pub fn encode(&self) -> String {
        format!("{}{}", MULTIBASE_BASE58BTC, self.0.to_base58())
    }

    /// Parse the multibase text form, rejecting anything but an Ed25519 principal.
    pub fn decode(s: &str) -> Result<Self, PrincipalError> {
        let payload = s
            .strip_prefix(MULTIBASE_BASE58BTC)
            .ok_or(PrincipalError::MissingMultibasePrefix)?;
        let bytes = payload
            .from_base58()
            .map_err(|e| PrincipalError::InvalidBase58(format!("{:?}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The raw Ed25519 key, if this is a well-formed Ed25519 principal.
    pub fn ed25519_key(&self) -> Option<[u8; 32]> {
        if self.0.len() != ED25519_PRINCIPAL_SIZE || self.0[..2] != ED25519_PUB_PREFIX {
            return None;
        }
        self.0[2..].try_into().ok()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.encode())
    }
}

impl FromStr for Principal {
    type Err = PrincipalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Principal::decode(s)
    }
}

impl AsRef<[u8]> for Principal {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Principals travel as CBOR byte strings inside blobs.
impl Serialize for Principal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Ok(Principal(bytes.into_vec()))
    }
}
