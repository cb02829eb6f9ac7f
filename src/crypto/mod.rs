//! Crypto module: the envelope encryption chain protecting the account key at rest.
//!
//! Password path: `Argon2id(password, email) -> HKDF-SHA256("enc", 64 bytes)`, split
//! into an encryption key (wraps the DEK) and an auth hash (login proof only).
//! Passkey path: a WebAuthn PRF output is used directly as the wrap key.
//! Every ciphertext is `nonce(24) || XChaCha20-Poly1305 ciphertext`.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{AccountKeyPair, SigningHandle};
use crate::util::{b64url_decode, b64url_encode};

/// Default Argon2id memory cost (64 MiB).
pub const ARGON2_MEMORY_KIB: u32 = 65536;

/// Default Argon2id iteration count.
pub const ARGON2_ITERATIONS: u32 = 3;

/// Default Argon2id parallelism.
pub const ARGON2_PARALLELISM: u32 = 4;

/// Argon2id output length (the master key).
pub const MASTER_KEY_LEN: usize = 32;

/// HKDF output length: encryption key followed by auth hash.
pub const STRETCHED_KEY_LEN: usize = 64;

/// HKDF info string for the stretched key.
pub const HKDF_INFO: &[u8] = b"enc";

/// XChaCha20 nonce length.
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// AEAD key length; longer keys are truncated to this.
pub const KEY_LEN: usize = 32;

/// Data Encryption Key length.
pub const DEK_LEN: usize = 64;

/// Fixed application-wide salt for the WebAuthn PRF extension.
pub const PRF_SALT: &[u8] = b"hypermedia-identity-vault-v1";

/// Current [`AccountEnvelope`] format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Argon2id cost parameters, stored alongside every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: ARGON2_MEMORY_KIB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

/// Trim and lowercase an email so the same account always derives the same salt.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn email_to_salt(email: &str) -> Vec<u8> {
    normalize_email(email).into_bytes()
}

/// Argon2id master key from a password and salt.
///
/// Argon2 rejects salts shorter than 8 bytes, so very short emails fail here.
pub fn derive_master_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, CryptoError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(MASTER_KEY_LEN),
    )
    .map_err(|e| CryptoError::Kdf(format!("argon2 params error: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut master = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, master.as_mut())
        .map_err(|e| CryptoError::Kdf(format!("argon2 hash error: {}", e)))?;
    Ok(master)
}

/// HKDF-SHA256 expansion of the master key with an empty salt.
pub fn stretch_key(
    master: &[u8],
    info: &[u8],
) -> Result<Zeroizing<[u8; STRETCHED_KEY_LEN]>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, master);
    let mut okm = Zeroizing::new([0u8; STRETCHED_KEY_LEN]);
    hkdf.expand(info, okm.as_mut())
        .map_err(|e| CryptoError::Kdf(format!("hkdf expand error: {}", e)))?;
    Ok(okm)
}

/// The two halves of the stretched key.
pub struct PasswordKeys {
    /// Wraps the DEK. Never leaves the client.
    pub enc_key: Zeroizing<[u8; 32]>,
    /// Login proof. Never used for encryption.
    pub auth_hash: [u8; 32],
}

/// Derive the password keys with the default cost parameters.
pub fn derive_password_keys(password: &str, email: &str) -> Result<PasswordKeys, CryptoError> {
    derive_password_keys_with(password, email, &KdfParams::default())
}

pub fn derive_password_keys_with(
    password: &str,
    email: &str,
    params: &KdfParams,
) -> Result<PasswordKeys, CryptoError> {
    let master = derive_master_key(password, &email_to_salt(email), params)?;
    let stretched = stretch_key(master.as_ref(), HKDF_INFO)?;

    let mut enc_key = Zeroizing::new([0u8; 32]);
    enc_key.copy_from_slice(&stretched[..32]);
    let mut auth_hash = [0u8; 32];
    auth_hash.copy_from_slice(&stretched[32..]);
    Ok(PasswordKeys { enc_key, auth_hash })
}

/// Seal `plaintext` under `key[0..32]` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce: [u8; NONCE_LEN] = rand::thread_rng().gen();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open `nonce || ciphertext`. Fails closed on a wrong key or any tampering.
pub fn decrypt(data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::CiphertextTooShort(data.len()));
    }
    let cipher = cipher_for(key)?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305, CryptoError> {
    if key.len() < KEY_LEN {
        return Err(CryptoError::KeyTooShort(key.len()));
    }
    XChaCha20Poly1305::new_from_slice(&key[..KEY_LEN]).map_err(|_| CryptoError::KeyTooShort(key.len()))
}

/// A fresh random Data Encryption Key.
pub fn generate_dek() -> Zeroizing<[u8; DEK_LEN]> {
    let mut dek = Zeroizing::new([0u8; DEK_LEN]);
    OsRng.fill_bytes(dek.as_mut());
    dek
}

/// Wrap the DEK with a password `enc_key` or a PRF output.
pub fn wrap_dek(dek: &[u8; DEK_LEN], wrap_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt(dek, wrap_key)
}

pub fn unwrap_dek(wrapped: &[u8], wrap_key: &[u8]) -> Result<Zeroizing<[u8; DEK_LEN]>, CryptoError> {
    let plain = decrypt(wrapped, wrap_key)?;
    if plain.len() != DEK_LEN {
        return Err(CryptoError::InvalidKeyMaterial {
            expected: DEK_LEN,
            got: plain.len(),
        });
    }
    let mut dek = Zeroizing::new([0u8; DEK_LEN]);
    dek.copy_from_slice(&plain);
    Ok(dek)
}

/// Result of the WebAuthn PRF extension as reported by the authenticator.
#[derive(Debug, Clone, Default)]
pub struct PrfOutput {
    /// Output for [`PRF_SALT`], absent when no PRF was evaluated.
    pub first: Option<Vec<u8>>,
    /// The authenticator reported the PRF extension as enabled for this credential.
    pub enabled: bool,
}

/// The 32-byte wrap key carried by a PRF result.
///
/// Without a result, a credential that never enabled PRF is
/// [`CryptoError::PrfUnsupported`] (fall back to the password path), while an
/// enabled one is [`CryptoError::PrfResultMissing`] (evaluate PRF and retry).
pub fn extract_prf_key(output: &PrfOutput) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let first = match (output.first.as_deref(), output.enabled) {
        (Some(first), _) => first,
        (None, true) => return Err(CryptoError::PrfResultMissing),
        (None, false) => return Err(CryptoError::PrfUnsupported),
    };
    let key: [u8; 32] = first
        .try_into()
        .map_err(|_| CryptoError::InvalidPrfOutput(first.len()))?;
    Ok(Zeroizing::new(key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

/// Score a password: under 8 characters is always weak; one point each for
/// 12+ chars, 16+ chars, mixed case, a digit, and a symbol.
pub fn password_strength(password: &str) -> PasswordStrength {
    if password.chars().count() < 8 {
        return PasswordStrength::Weak;
    }

    let len = password.chars().count();
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let checks = [
        len >= 12,
        len >= 16,
        has_lower && has_upper,
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];

    match checks.iter().filter(|passed| **passed).count() {
        0..=1 => PasswordStrength::Weak,
        2..=3 => PasswordStrength::Medium,
        _ => PasswordStrength::Strong,
    }
}

/// At-rest record of an account: the account seed sealed under a DEK, which is
/// itself wrapped by the password key and optionally by a passkey PRF key.
///
/// Binary fields are base64url text so the record stays plain JSON on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEnvelope {
    pub version: u8,
    pub principal: String,
    pub email: String,
    /// Display name published in profiles issued by this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kdf: KdfParams,
    pub auth_hash: String,
    pub encrypted_dek: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passkey_encrypted_dek: Option<String>,
    pub encrypted_account_key: String,
}

impl AccountEnvelope {
    /// Seal a new account under `password`, generating a fresh DEK.
    pub fn seal(
        keypair: &AccountKeyPair,
        email: &str,
        password: &str,
        kdf: KdfParams,
    ) -> Result<Self, CryptoError> {
        let email = normalize_email(email);
        let keys = derive_password_keys_with(password, &email, &kdf)?;
        let dek = generate_dek();

        let encrypted_dek = wrap_dek(&dek, keys.enc_key.as_ref())?;
        let encrypted_account_key = encrypt(keypair.seed().as_ref(), dek.as_ref())?;

        tracing::debug!(principal = %keypair.principal(), "sealed account envelope");
        Ok(Self {
            version: ENVELOPE_VERSION,
            principal: keypair.principal().encode(),
            email,
            name: None,
            kdf,
            auth_hash: b64url_encode(keys.auth_hash),
            encrypted_dek: b64url_encode(encrypted_dek),
            passkey_encrypted_dek: None,
            encrypted_account_key: b64url_encode(encrypted_account_key),
        })
    }

    pub fn has_passkey(&self) -> bool {
        self.passkey_encrypted_dek.is_some()
    }

    /// Recover the account key with email and password.
    ///
    /// An unknown email and a wrong password yield the same error.
    pub fn unlock_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AccountKeyPair, CryptoError> {
        let dek = self.password_dek(email, password)?;
        self.open_account_key(dek.as_ref())
    }

    /// Recover the account key with a passkey PRF result.
    pub fn unlock_with_prf(&self, prf: &PrfOutput) -> Result<AccountKeyPair, CryptoError> {
        let wrap_key = extract_prf_key(prf)?;
        let wrapped = self
            .passkey_encrypted_dek
            .as_deref()
            .ok_or(CryptoError::NoPasskey)?;
        let wrapped = b64url_decode(wrapped)
            .map_err(|_| CryptoError::InvalidEncoding("passkey_encrypted_dek"))?;
        let dek = unwrap_dek(&wrapped, wrap_key.as_ref()).map_err(|e| {
            tracing::debug!(error = %e, "passkey DEK unwrap failed");
            CryptoError::InvalidCredentials
        })?;
        self.open_account_key(dek.as_ref())
    }

    /// Wrap the existing DEK with a passkey PRF key, replacing any earlier passkey.
    pub fn add_passkey(
        &mut self,
        email: &str,
        password: &str,
        prf: &PrfOutput,
    ) -> Result<(), CryptoError> {
        let wrap_key = extract_prf_key(prf)?;
        let dek = self.password_dek(email, password)?;
        let wrapped = wrap_dek(&dek, wrap_key.as_ref())?;
        self.passkey_encrypted_dek = Some(b64url_encode(wrapped));
        Ok(())
    }

    /// Rewrap the DEK under a new password. The DEK and any passkey wrapping are unchanged.
    pub fn change_password(
        &mut self,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), CryptoError> {
        let dek = self.password_dek(email, old_password)?;
        let keys = derive_password_keys_with(new_password, &self.email, &self.kdf)?;
        self.encrypted_dek = b64url_encode(wrap_dek(&dek, keys.enc_key.as_ref())?);
        self.auth_hash = b64url_encode(keys.auth_hash);
        Ok(())
    }

    fn password_dek(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Zeroizing<[u8; DEK_LEN]>, CryptoError> {
        if normalize_email(email) != self.email {
            return Err(CryptoError::InvalidCredentials);
        }
        let keys = derive_password_keys_with(password, &self.email, &self.kdf)?;

        let stored_auth =
            b64url_decode(&self.auth_hash).map_err(|_| CryptoError::InvalidEncoding("auth_hash"))?;
        if !bool::from(stored_auth.as_slice().ct_eq(&keys.auth_hash[..])) {
            return Err(CryptoError::InvalidCredentials);
        }

        let wrapped = b64url_decode(&self.encrypted_dek)
            .map_err(|_| CryptoError::InvalidEncoding("encrypted_dek"))?;
        unwrap_dek(&wrapped, keys.enc_key.as_ref()).map_err(|e| {
            tracing::debug!(error = %e, "password DEK unwrap failed");
            CryptoError::InvalidCredentials
        })
    }

    fn open_account_key(&self, dek: &[u8]) -> Result<AccountKeyPair, CryptoError> {
        let sealed = b64url_decode(&self.encrypted_account_key)
            .map_err(|_| CryptoError::InvalidEncoding("encrypted_account_key"))?;
        let seed = decrypt(&sealed, dek)?;
        let seed: [u8; 32] = seed.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKeyMaterial {
                expected: 32,
                got: seed.len(),
            }
        })?;
        let keypair = AccountKeyPair::from_seed(&seed);
        if keypair.principal().encode() != self.principal {
            return Err(CryptoError::DecryptionFailed);
        }
        Ok(keypair)
    }
}
