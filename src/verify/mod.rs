//! Signature verification against compressed public keys.
//!
//! Used by request signing outside the delegation flow. A key is either an
//! Ed25519 principal or a SEC1-compressed P-256 point (optionally behind the
//! p256-pub multicodec prefix). P-256 signatures are raw `r || s` over SHA-256.

use num_bigint::BigUint;
use p256::ecdsa::signature::Verifier as _;

use crate::error::VerifyError;
use crate::keys::{verify_ed25519, Signature, SIGNATURE_SIZE};
use crate::principal::{ED25519_PUBLIC_KEY_SIZE, ED25519_PUB_PREFIX, P256_PUB_PREFIX};

/// SEC1 compressed point size: tag byte + 32-byte x coordinate.
pub const COMPRESSED_POINT_SIZE: usize = 33;

/// SEC1 uncompressed point size: `0x04 || x || y`.
pub const UNCOMPRESSED_POINT_SIZE: usize = 65;

// NIST P-256 domain parameters; a = p - 3.
const P256_P: &str = "ffffffff00000001000000000000000000000000ffffffffffffffffffffffff";
const P256_B: &str = "5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b";

/// How a compressed P-256 point is turned into a verifying key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decompression {
    /// SEC1 import by the curve library.
    #[default]
    Native,
    /// Square root computed here, then an uncompressed import.
    Manual,
}

enum CompressedKey<'a> {
    Ed25519([u8; 32]),
    P256(&'a [u8]),
}

fn classify(key: &[u8]) -> Result<CompressedKey<'_>, VerifyError> {
    match key {
        [a, b, rest @ ..] if [*a, *b] == ED25519_PUB_PREFIX && rest.len() == ED25519_PUBLIC_KEY_SIZE => {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(rest);
            Ok(CompressedKey::Ed25519(raw))
        }
        [a, b, rest @ ..] if [*a, *b] == P256_PUB_PREFIX && rest.len() == COMPRESSED_POINT_SIZE => {
            Ok(CompressedKey::P256(rest))
        }
        [0x02 | 0x03, ..] if key.len() == COMPRESSED_POINT_SIZE => Ok(CompressedKey::P256(key)),
        _ => Err(VerifyError::UnsupportedKey(key.len())),
    }
}

/// Verify `signature` over `message`; any malformed input is simply `false`.
pub fn verify_compressed(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match verify_compressed_checked(key, message, signature) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "compressed key verification failed");
            false
        }
    }
}

pub fn verify_compressed_checked(
    key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), VerifyError> {
    verify_compressed_with(Decompression::default(), key, message, signature)
}

pub fn verify_compressed_with(
    decompression: Decompression,
    key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), VerifyError> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(VerifyError::InvalidSignatureLength(signature.len()));
    }

    match classify(key)? {
        CompressedKey::Ed25519(public_key) => {
            let sig = Signature::from_slice(signature).ok_or(VerifyError::MalformedSignature)?;
            if verify_ed25519(&public_key, message, &sig) {
                Ok(())
            } else {
                Err(VerifyError::BadSignature)
            }
        }
        CompressedKey::P256(point) => {
            let verifying_key = match decompression {
                Decompression::Native => {
                    check_compression_tag(point)?;
                    p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                        .map_err(|_| VerifyError::NotOnCurve)?
                }
                Decompression::Manual => {
                    let uncompressed = decompress_point(point)?;
                    p256::ecdsa::VerifyingKey::from_sec1_bytes(&uncompressed)
                        .map_err(|_| VerifyError::NotOnCurve)?
                }
            };
            let sig = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| VerifyError::MalformedSignature)?;
            verifying_key
                .verify(message, &sig)
                .map_err(|_| VerifyError::BadSignature)
        }
    }
}

fn check_compression_tag(point: &[u8]) -> Result<u8, VerifyError> {
    match point.first() {
        Some(&tag @ (0x02 | 0x03)) => Ok(tag),
        Some(&tag) => Err(VerifyError::InvalidCompressionTag(tag)),
        None => Err(VerifyError::UnsupportedKey(0)),
    }
}

fn field_constant(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).expect("valid P-256 field constant")
}

fn to_field_bytes(n: &BigUint) -> [u8; 32] {
    let bytes = n.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Recover `0x04 || x || y` from a compressed P-256 point.
///
/// Solves `y^2 = x^3 + ax + b (mod p)` and picks the root whose parity matches
/// the tag (`0x02` even, `0x03` odd).
pub fn decompress_point(compressed: &[u8]) -> Result<[u8; UNCOMPRESSED_POINT_SIZE], VerifyError> {
    if compressed.len() != COMPRESSED_POINT_SIZE {
        return Err(VerifyError::UnsupportedKey(compressed.len()));
    }
    let tag = check_compression_tag(compressed)?;

    let p = field_constant(P256_P);
    let a = &p - 3u32;
    let b = field_constant(P256_B);

    let x = BigUint::from_bytes_be(&compressed[1..]);
    if x >= p {
        return Err(VerifyError::InvalidCoordinate);
    }

    let rhs = (&x * &x * &x + &a * &x + &b) % &p;
    let mut y = mod_sqrt(&rhs, &p).ok_or(VerifyError::NotOnCurve)?;
    if y.bit(0) != (tag == 0x03) {
        y = (&p - &y) % &p;
    }

    let mut out = [0u8; UNCOMPRESSED_POINT_SIZE];
    out[0] = 0x04;
    out[1..33].copy_from_slice(&to_field_bytes(&x));
    out[33..].copy_from_slice(&to_field_bytes(&y));
    Ok(out)
}

/// Square root of `n` modulo an odd prime `p` (Tonelli-Shanks).
///
/// Returns `None` when `n` is a quadratic non-residue.
pub fn mod_sqrt(n: &BigUint, p: &BigUint) -> Option<BigUint> {
    let zero = BigUint::from(0u32);
    let one = BigUint::from(1u32);
    let n = n % p;
    if n == zero {
        return Some(zero);
    }

    let p_minus_one = p - &one;
    let euler_exp = &p_minus_one >> 1usize;
    if n.modpow(&euler_exp, p) != one {
        return None;
    }

    // p = 3 mod 4
    if p.bit(0) && p.bit(1) {
        return Some(n.modpow(&((p + &one) >> 2usize), p));
    }

    // p - 1 = q * 2^s with q odd
    let mut q = p_minus_one.clone();
    let mut s = 0u32;
    while !q.bit(0) {
        q >>= 1usize;
        s += 1;
    }

    let mut z = BigUint::from(2u32);
    while z.modpow(&euler_exp, p) != p_minus_one {
        z += 1u32;
    }

    let mut m = s;
    let mut c = z.modpow(&q, p);
    let mut t = n.modpow(&q, p);
    let mut r = n.modpow(&((&q + &one) >> 1usize), p);

    while t != one {
        let mut i = 0u32;
        let mut t2i = t.clone();
        while t2i != one {
            t2i = (&t2i * &t2i) % p;
            i += 1;
            if i == m {
                return None;
            }
        }

        let b = c.modpow(&(BigUint::from(1u32) << ((m - i - 1) as usize)), p);
        m = i;
        c = (&b * &b) % p;
        t = (&t * &c) % p;
        r = (&r * &b) % p;
    }
    Some(r)
}
