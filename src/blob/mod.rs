//! Blob module: signed, content-addressed records.
//!
//! Every blob shares the envelope `{type, signer, sig, ts}` and is encoded as
//! DAG-CBOR, whose map encoding is canonical: the same logical record always
//! produces the same bytes and therefore the same CID. Signing zeroes `sig`,
//! encodes, and signs those bytes; verification repeats the exact procedure.

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::{Deserialize, Serialize};

use crate::error::BlobError;
use crate::keys::{verify_ed25519, Signature, SigningHandle};
use crate::principal::Principal;

/// Multicodec code for DAG-CBOR, recorded in every blob CID.
pub const DAG_CBOR_CODEC: u64 = 0x71;

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Role granted by a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Writer,
    Agent,
}

// The `type` discriminator of each record kind is a zero-sized marker that
// serializes as a fixed string and refuses any other value on decode.
macro_rules! blob_type_marker {
    ($marker:ident, $name:literal) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        struct $marker;

        impl Serialize for $marker {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str($name)
            }
        }

        impl<'de> Deserialize<'de> for $marker {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                if value == $name {
                    Ok($marker)
                } else {
                    Err(serde::de::Error::custom(format!(
                        "expected blob type {}, got {}",
                        $name, value
                    )))
                }
            }
        }
    };
}

blob_type_marker!(ProfileType, "Profile");
blob_type_marker!(CapabilityType, "Capability");

/// Identity statement about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "type")]
    kind: ProfileType,
    pub signer: Principal,
    pub sig: Signature,
    pub ts: Timestamp,
    /// Redirects this identity to another key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set only when an agent key signs on behalf of a different account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Principal>,
}

impl Profile {
    /// The account this profile speaks for: `account` if present, else the signer.
    pub fn owner(&self) -> &Principal {
        self.account.as_ref().unwrap_or(&self.signer)
    }
}

/// Delegation grant from the signer to `delegate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(rename = "type")]
    kind: CapabilityType,
    pub signer: Principal,
    pub sig: Signature,
    pub ts: Timestamp,
    pub delegate: Principal,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// For direct authentication against another principal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<Principal>,
}

/// Any supported record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Blob {
    Profile(Profile),
    Capability(Capability),
}

impl Blob {
    pub fn type_name(&self) -> &'static str {
        match self {
            Blob::Profile(_) => "Profile",
            Blob::Capability(_) => "Capability",
        }
    }

    /// Content address of the blob's canonical encoding.
    pub fn cid(&self) -> Result<Cid, BlobError> {
        Ok(cid_for(&to_cbor(self)?))
    }
}

impl From<Profile> for Blob {
    fn from(profile: Profile) -> Self {
        Blob::Profile(profile)
    }
}

impl From<Capability> for Blob {
    fn from(capability: Capability) -> Self {
        Blob::Capability(capability)
    }
}

/// The shared `{signer, sig, ts}` envelope every signable record exposes.
pub trait Signable: Serialize + Clone {
    fn signer(&self) -> &Principal;
    fn sig(&self) -> &Signature;
    fn set_sig(&mut self, sig: Signature);
    fn ts(&self) -> Timestamp;
}

impl Signable for Profile {
    fn signer(&self) -> &Principal {
        &self.signer
    }
    fn sig(&self) -> &Signature {
        &self.sig
    }
    fn set_sig(&mut self, sig: Signature) {
        self.sig = sig;
    }
    fn ts(&self) -> Timestamp {
        self.ts
    }
}

impl Signable for Capability {
    fn signer(&self) -> &Principal {
        &self.signer
    }
    fn sig(&self) -> &Signature {
        &self.sig
    }
    fn set_sig(&mut self, sig: Signature) {
        self.sig = sig;
    }
    fn ts(&self) -> Timestamp {
        self.ts
    }
}

impl Signable for Blob {
    fn signer(&self) -> &Principal {
        match self {
            Blob::Profile(p) => p.signer(),
            Blob::Capability(c) => c.signer(),
        }
    }
    fn sig(&self) -> &Signature {
        match self {
            Blob::Profile(p) => p.sig(),
            Blob::Capability(c) => c.sig(),
        }
    }
    fn set_sig(&mut self, sig: Signature) {
        match self {
            Blob::Profile(p) => p.set_sig(sig),
            Blob::Capability(c) => c.set_sig(sig),
        }
    }
    fn ts(&self) -> Timestamp {
        match self {
            Blob::Profile(p) => p.ts(),
            Blob::Capability(c) => c.ts(),
        }
    }
}

/// A signed blob together with its canonical bytes and content address.
#[derive(Debug, Clone)]
pub struct EncodedBlob<T> {
    pub cid: Cid,
    pub bytes: Vec<u8>,
    pub decoded: T,
}

/// Canonical DAG-CBOR encoding.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, BlobError> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| BlobError::Encode(e.to_string()))
}

pub fn from_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, BlobError> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| BlobError::Decode(e.to_string()))
}

/// CIDv1 tagged dag-cbor over the sha2-256 digest of `bytes`.
pub fn cid_for(bytes: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR_CODEC, Code::Sha2_256.digest(bytes))
}

/// Sign a blob: zero `sig`, encode, sign the bytes, store the signature.
pub fn sign<T: Signable>(key: &impl SigningHandle, blob: T) -> Result<T, BlobError> {
    let mut unsigned = blob;
    unsigned.set_sig(Signature::zero());
    let data = to_cbor(&unsigned)?;
    unsigned.set_sig(key.sign(&data));
    Ok(unsigned)
}

/// Verify a blob's signature against its embedded signer.
///
/// Returns false for unknown algorithms, malformed keys, and any record that no
/// longer encodes to the bytes that were signed.
pub fn verify<T: Signable>(blob: &T) -> bool {
    let Some(public_key) = blob.signer().ed25519_key() else {
        return false;
    };
    let mut unsigned = blob.clone();
    unsigned.set_sig(Signature::zero());
    match to_cbor(&unsigned) {
        Ok(data) => verify_ed25519(&public_key, &data, blob.sig()),
        Err(e) => {
            tracing::debug!(error = %e, "blob failed to re-encode during verification");
            false
        }
    }
}

/// Encode a signed blob and compute its CID.
pub fn encode<T: Signable>(blob: T) -> Result<EncodedBlob<T>, BlobError> {
    let bytes = to_cbor(&blob)?;
    Ok(EncodedBlob {
        cid: cid_for(&bytes),
        bytes,
        decoded: blob,
    })
}

/// Decode any supported blob, dispatching on its `type` field.
pub fn decode_blob(bytes: &[u8]) -> Result<Blob, BlobError> {
    #[derive(Deserialize)]
    struct Header {
        #[serde(rename = "type")]
        kind: String,
    }

    let header: Header = from_cbor(bytes)?;
    match header.kind.as_str() {
        "Profile" => Ok(Blob::Profile(from_cbor(bytes)?)),
        "Capability" => Ok(Blob::Capability(from_cbor(bytes)?)),
        other => Err(BlobError::UnknownType(other.to_string())),
    }
}

/// Options for [`create_profile`].
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    /// Omitted from the blob when it equals the signer.
    pub account: Option<Principal>,
}

/// Create a signed and encoded Profile blob.
pub fn create_profile(
    key: &impl SigningHandle,
    opts: ProfileOptions,
    ts: Timestamp,
) -> Result<EncodedBlob<Profile>, BlobError> {
    let signer = key.principal();
    let account = opts.account.filter(|account| *account != signer);

    let blob = Profile {
        kind: ProfileType,
        signer,
        sig: Signature::zero(),
        ts,
        alias: None,
        name: opts.name,
        avatar: opts.avatar,
        description: opts.description,
        account,
    };
    encode(sign(key, blob)?)
}

/// Create a signed and encoded alias Profile (identity redirect).
pub fn create_profile_alias(
    key: &impl SigningHandle,
    alias: Principal,
    ts: Timestamp,
) -> Result<EncodedBlob<Profile>, BlobError> {
    let blob = Profile {
        kind: ProfileType,
        signer: key.principal(),
        sig: Signature::zero(),
        ts,
        alias: Some(alias),
        name: None,
        avatar: None,
        description: None,
        account: None,
    };
    encode(sign(key, blob)?)
}

/// Options for [`create_capability`].
#[derive(Debug, Clone, Default)]
pub struct CapabilityOptions {
    pub path: Option<String>,
    pub label: Option<String>,
    pub audience: Option<Principal>,
}

/// Create a signed and encoded Capability blob.
pub fn create_capability(
    issuer: &impl SigningHandle,
    delegate: Principal,
    role: Role,
    ts: Timestamp,
    opts: CapabilityOptions,
) -> Result<EncodedBlob<Capability>, BlobError> {
    let blob = Capability {
        kind: CapabilityType,
        signer: issuer.principal(),
        sig: Signature::zero(),
        ts,
        delegate,
        role,
        path: opts.path,
        label: opts.label,
        audience: opts.audience,
    };
    encode(sign(issuer, blob)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AccountKeyPair;

    const TS: Timestamp = 1_700_000_000_000;

    fn fixed_keypair() -> AccountKeyPair {
        AccountKeyPair::from_seed(&[42u8; 32])
    }

    fn other_keypair() -> AccountKeyPair {
        AccountKeyPair::from_seed(&[99u8; 32])
    }

    fn sample_profile() -> Profile {
        create_profile(
            &fixed_keypair(),
            ProfileOptions {
                name: Some("Alice".to_string()),
                description: Some("test account".to_string()),
                ..Default::default()
            },
            TS,
        )
        .expect("create_profile should succeed")
        .decoded
    }

    fn sample_capability() -> Capability {
        create_capability(
            &fixed_keypair(),
            other_keypair().principal(),
            Role::Agent,
            TS,
            CapabilityOptions {
                label: Some("Session key for https://example.com".to_string()),
                ..Default::default()
            },
        )
        .expect("create_capability should succeed")
        .decoded
    }

    #[test]
    fn test_signed_blobs_verify() {
        assert!(verify(&sample_profile()));
        assert!(verify(&sample_capability()));
        assert!(verify(&Blob::from(sample_capability())));
    }

    #[test]
    fn test_mutating_any_profile_field_breaks_verification() {
        let profile = sample_profile();

        let mut tampered = profile.clone();
        tampered.ts += 1;
        assert!(!verify(&tampered), "ts tamper must fail");

        let mut tampered = profile.clone();
        tampered.name = Some("Mallory".to_string());
        assert!(!verify(&tampered), "name tamper must fail");

        let mut tampered = profile.clone();
        tampered.avatar = Some("ipfs://evil".to_string());
        assert!(!verify(&tampered), "added field must fail");

        let mut tampered = profile.clone();
        tampered.description = None;
        assert!(!verify(&tampered), "removed field must fail");

        let mut tampered = profile.clone();
        tampered.account = Some(other_keypair().principal());
        assert!(!verify(&tampered), "account tamper must fail");

        let mut tampered = profile;
        tampered.sig.0[0] ^= 0x01;
        assert!(!verify(&tampered), "signature tamper must fail");
    }

    #[test]
    fn test_mutating_any_capability_field_breaks_verification() {
        let capability = sample_capability();

        let mut tampered = capability.clone();
        tampered.delegate = fixed_keypair().principal();
        assert!(!verify(&tampered), "delegate tamper must fail");

        let mut tampered = capability.clone();
        tampered.role = Role::Writer;
        assert!(!verify(&tampered), "role tamper must fail");

        let mut tampered = capability.clone();
        tampered.path = Some("/docs".to_string());
        assert!(!verify(&tampered), "path tamper must fail");

        let mut tampered = capability;
        tampered.signer = other_keypair().principal();
        assert!(!verify(&tampered), "signer swap must fail");
    }

    #[test]
    fn test_verify_rejects_unknown_signer_algorithm() {
        let mut capability = sample_capability();
        let mut bytes = capability.signer.as_bytes().to_vec();
        bytes[0] = 0x00;
        capability.signer = Principal::from_raw(bytes);
        assert!(!verify(&capability));

        let mut capability = sample_capability();
        capability.signer = Principal::from_raw(vec![0xED, 0x01, 0xAA]);
        assert!(!verify(&capability), "short key must be rejected");
    }

    #[test]
    fn test_profile_omits_account_equal_to_signer() {
        let keypair = fixed_keypair();
        let profile = create_profile(
            &keypair,
            ProfileOptions {
                name: Some("Alice".to_string()),
                account: Some(keypair.principal()),
                ..Default::default()
            },
            TS,
        )
        .unwrap();
        assert_eq!(profile.decoded.account, None);
        assert_eq!(profile.decoded.owner(), &keypair.principal());
    }

    #[test]
    fn test_agent_profile_keeps_foreign_account() {
        let agent = other_keypair();
        let account = fixed_keypair().principal();
        let profile = create_profile(
            &agent,
            ProfileOptions {
                account: Some(account.clone()),
                ..Default::default()
            },
            TS,
        )
        .unwrap();
        assert_eq!(profile.decoded.account.as_ref(), Some(&account));
        assert_eq!(profile.decoded.owner(), &account);
        assert!(verify(&profile.decoded));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode(sample_capability()).unwrap();
        let b = encode(sample_capability()).unwrap();
        assert_eq!(a.bytes, b.bytes, "identical content must encode identically");
        assert_eq!(a.cid, b.cid, "identical content must hash identically");
    }

    #[test]
    fn test_cid_is_dag_cbor_sha256() {
        let encoded = encode(sample_profile()).unwrap();
        assert_eq!(encoded.cid.version(), cid::Version::V1);
        assert_eq!(encoded.cid.codec(), DAG_CBOR_CODEC);
        assert_eq!(encoded.cid.hash().code(), 0x12);
        assert_eq!(encoded.cid, cid_for(&encoded.bytes));
        assert_eq!(Blob::from(sample_profile()).cid().unwrap(), encoded.cid);
    }

    #[test]
    fn test_different_content_different_cid() {
        let a = encode(sample_profile()).unwrap();
        let mut changed = sample_profile();
        changed.ts += 1;
        let b = encode(changed).unwrap();
        assert_ne!(a.cid, b.cid);
    }

    #[test]
    fn test_decode_blob_dispatches_on_type() {
        let capability = encode(sample_capability()).unwrap();
        let decoded = decode_blob(&capability.bytes).unwrap();
        assert_eq!(decoded.type_name(), "Capability");
        assert_eq!(decoded, Blob::Capability(capability.decoded));
        assert!(verify(&decoded));

        let profile = encode(sample_profile()).unwrap();
        assert!(matches!(decode_blob(&profile.bytes).unwrap(), Blob::Profile(_)));
    }

    #[test]
    fn test_decode_blob_rejects_unknown_type() {
        #[derive(Serialize)]
        struct Foreign {
            #[serde(rename = "type")]
            kind: &'static str,
            ts: u64,
        }
        let bytes = to_cbor(&Foreign {
            kind: "Comment",
            ts: TS,
        })
        .unwrap();
        assert!(matches!(
            decode_blob(&bytes),
            Err(BlobError::UnknownType(t)) if t == "Comment"
        ));
    }

    #[test]
    fn test_capability_decoder_rejects_profile_bytes() {
        let profile = encode(sample_profile()).unwrap();
        assert!(from_cbor::<Capability>(&profile.bytes).is_err());
    }

    #[test]
    fn test_alias_profile() {
        let target = other_keypair().principal();
        let alias = create_profile_alias(&fixed_keypair(), target.clone(), TS).unwrap();
        assert_eq!(alias.decoded.alias, Some(target));
        assert_eq!(alias.decoded.name, None);
        assert!(verify(&alias.decoded));
    }

    #[test]
    fn test_role_encodes_uppercase() {
        let encoded = encode(sample_capability()).unwrap();
        let needle = b"AGENT";
        assert!(encoded.bytes.windows(needle.len()).any(|w| w == needle));
    }
}
