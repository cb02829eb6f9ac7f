//! Key material: the opaque signing-handle abstraction and the account key pair.

pub mod fingerprint;
pub mod store;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

use crate::principal::Principal;

/// Ed25519 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// A 64-byte signature, encoded as a CBOR byte string.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// The all-zero placeholder a blob carries while it is being signed.
    pub const fn zero() -> Self {
        Signature([0u8; SIGNATURE_SIZE])
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Signature)
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::zero()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", crate::util::b64url_encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Signature::from_slice(&bytes).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            ))
        })
    }
}

/// A key that can sign but never hands out its private bytes.
///
/// Both the vault's account key and a relying site's session key sign through
/// this interface, so blob signing works identically for either.
pub trait SigningHandle {
    fn sign(&self, message: &[u8]) -> Signature;

    fn public_key(&self) -> [u8; 32];

    fn principal(&self) -> Principal {
        Principal::from_ed25519(&self.public_key())
    }
}

/// The account's Ed25519 key pair, held by the vault once unlocked.
#[derive(Clone)]
pub struct AccountKeyPair {
    signing_key: SigningKey,
    principal: Principal,
}

impl AccountKeyPair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild a key pair from its 32-byte seed (as recovered from the envelope).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let principal = Principal::from_ed25519(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            principal,
        }
    }

    /// The seed, exposed only so the envelope chain can seal it at rest.
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }
}

impl SigningHandle for AccountKeyPair {
    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn principal(&self) -> Principal {
        self.principal.clone()
    }
}

impl fmt::Debug for AccountKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeyPair")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify_ed25519(public_key: &[u8; 32], message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify_strict(message, &sig).is_ok()
}
