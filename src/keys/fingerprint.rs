use crate::principal::Principal;

/// First eight base58 characters after the multibase prefix and the constant
/// `6Mk` that every Ed25519 principal shares.
pub fn short_fingerprint(principal: &Principal) -> String {
    let text = principal.encode();
    text.chars().skip(4).take(8).collect()
}
