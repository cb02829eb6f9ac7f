/// Plaintext leak detection tests.
///
/// The sealed account envelope is written to disk as JSON. Neither the account
/// seed, the password, nor the data key may appear in it in any readable form:
/// raw bytes, base64url, or hex.
use hmvault::crypto::{self, AccountEnvelope, KdfParams, PrfOutput};
use hmvault::keys::AccountKeyPair;
use hmvault::util::b64url_encode;

const SEED: [u8; 32] = [42u8; 32];
const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "KNOWN-PASSWORD-must-not-appear-7";

/// Argon2 costs low enough for tests; production defaults are exercised in unit tests.
fn light_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

fn sealed_json() -> String {
    let keypair = AccountKeyPair::from_seed(&SEED);
    let envelope = AccountEnvelope::seal(&keypair, EMAIL, PASSWORD, light_kdf())
        .expect("seal should succeed");
    serde_json::to_string_pretty(&envelope).expect("envelope serializes")
}

fn assert_absent(haystack: &[u8], needle: &[u8], what: &str) {
    assert!(
        !haystack.windows(needle.len()).any(|w| w == needle),
        "envelope must not contain the {what}"
    );
}

// ── Test 1: seed never appears ─────────────────────────────────────────────

#[test]
fn test_envelope_contains_no_plaintext_seed() {
    let json = sealed_json();
    assert_absent(json.as_bytes(), &SEED, "raw seed bytes");
    assert_absent(json.as_bytes(), b64url_encode(SEED).as_bytes(), "base64url seed");
    assert_absent(json.as_bytes(), hex::encode(SEED).as_bytes(), "hex seed");
}

// ── Test 2: password never appears ─────────────────────────────────────────

#[test]
fn test_envelope_contains_no_password() {
    let json = sealed_json();
    assert_absent(json.as_bytes(), PASSWORD.as_bytes(), "password");
    assert_absent(
        json.as_bytes(),
        b64url_encode(PASSWORD).as_bytes(),
        "base64url password",
    );
}

// ── Test 3: seed ciphertext is not the seed ────────────────────────────────

#[test]
fn test_encrypted_account_key_is_not_seed() {
    let keypair = AccountKeyPair::from_seed(&SEED);
    let envelope = AccountEnvelope::seal(&keypair, EMAIL, PASSWORD, light_kdf()).unwrap();
    let blob = hmvault::util::b64url_decode(&envelope.encrypted_account_key).unwrap();

    assert_eq!(
        blob.len(),
        crypto::NONCE_LEN + SEED.len() + crypto::TAG_LEN,
        "ciphertext is nonce || seed-sized body || tag"
    );
    assert_absent(&blob, &SEED, "seed inside its own ciphertext");
}

// ── Test 4: passkey wrapping adds no plaintext ─────────────────────────────

#[test]
fn test_passkey_wrapped_envelope_contains_no_prf_output() {
    let prf_secret = [0x5Au8; 32];
    let keypair = AccountKeyPair::from_seed(&SEED);
    let mut envelope = AccountEnvelope::seal(&keypair, EMAIL, PASSWORD, light_kdf()).unwrap();
    envelope
        .add_passkey(
            EMAIL,
            PASSWORD,
            &PrfOutput {
                first: Some(prf_secret.to_vec()),
                enabled: true,
            },
        )
        .unwrap();

    let json = serde_json::to_string(&envelope).unwrap();
    assert_absent(json.as_bytes(), &SEED, "raw seed bytes");
    assert_absent(json.as_bytes(), b64url_encode(prf_secret).as_bytes(), "PRF output");
    assert_absent(json.as_bytes(), b64url_encode(SEED).as_bytes(), "base64url seed");
}

// ── Test 5: two seals of the same account share no ciphertext ──────────────

#[test]
fn test_resealing_uses_fresh_dek_and_nonces() {
    let a: AccountEnvelope = serde_json::from_str(&sealed_json()).unwrap();
    let b: AccountEnvelope = serde_json::from_str(&sealed_json()).unwrap();

    assert_eq!(a.principal, b.principal);
    assert_eq!(a.auth_hash, b.auth_hash, "auth hash is deterministic");
    assert_ne!(a.encrypted_dek, b.encrypted_dek);
    assert_ne!(a.encrypted_account_key, b.encrypted_account_key);
}
