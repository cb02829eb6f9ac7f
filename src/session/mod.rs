//! Relying-site session keys and their persistence.
//!
//! A session key is generated per vault, never leaves this module in raw form,
//! and is stored together with the pending auth attempt (if any) under the vault
//! URL. Only one attempt per vault is tracked; a new `put` fully replaces the old.

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::StoreError;
use crate::keys::{Signature, SigningHandle};
use crate::principal::Principal;
use crate::util::{b64url_decode, b64url_encode};

/// Non-extractable Ed25519 session key.
///
/// There is no accessor for the private bytes and no serde impl; only
/// [`FileStore`] persists them, through a record type private to this module.
///
/// ```compile_fail
/// fn requires_serialize<T: serde::Serialize>() {}
/// requires_serialize::<hmvault::session::SessionKey>();
/// ```
#[derive(Clone)]
pub struct SessionKey(SigningKey);

impl SessionKey {
    pub fn generate() -> Self {
        SessionKey(SigningKey::generate(&mut OsRng))
    }
}

impl SigningHandle for SessionKey {
    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }

    fn public_key(&self) -> [u8; 32] {
        self.0.verifying_key().to_bytes()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.principal())
    }
}

/// Seed encoding used by [`StoredRecord`] only.
mod key_seed {
    use super::*;

    pub fn serialize<S: Serializer>(key: &SessionKey, serializer: S) -> Result<S::Ok, S::Error> {
        let seed = Zeroizing::new(key.0.to_bytes());
        serializer.serialize_str(&b64url_encode(seed.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SessionKey, D::Error> {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        let bytes = Zeroizing::new(b64url_decode(&text).map_err(serde::de::Error::custom)?);
        let seed: Zeroizing<[u8; 32]> =
            Zeroizing::new(bytes.as_slice().try_into().map_err(|_| {
                serde::de::Error::custom(format!(
                    "session key must be 32 bytes, got {}",
                    bytes.len()
                ))
            })?);
        Ok(SessionKey(SigningKey::from_bytes(&seed)))
    }
}

/// Relying-site state for one vault.
///
/// The session key is reachable only as a [`SigningHandle`]; the record itself
/// has no serde impl.
///
/// ```compile_fail
/// fn requires_serialize<T: serde::Serialize>() {}
/// requires_serialize::<hmvault::session::StoredSession>();
/// ```
#[derive(Debug, Clone)]
pub struct StoredSession {
    key: SessionKey,
    pub public_key_raw: Vec<u8>,
    /// Multibase text form of the session principal.
    pub principal: String,
    pub vault_url: String,
    pub created_at: u64,
    /// Present only while an auth attempt is pending.
    pub auth_state: Option<String>,
    pub auth_start_time: Option<u64>,
    /// Set once a callback for this key has been fully verified.
    pub authenticated: bool,
}

impl StoredSession {
    /// A fresh pending attempt against `vault_url`.
    pub fn pending(key: SessionKey, vault_url: &str, state: String, now: u64) -> Self {
        Self {
            public_key_raw: key.public_key().to_vec(),
            principal: key.principal().encode(),
            key,
            vault_url: vault_url.to_string(),
            created_at: now,
            auth_state: Some(state),
            auth_start_time: Some(now),
            authenticated: false,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_pending(&self) -> bool {
        self.auth_state.is_some()
    }

    /// Consume the pending attempt. Any earlier authenticated outcome is void
    /// until the new callback verifies.
    pub fn clear_pending(&mut self) {
        self.auth_state = None;
        self.auth_start_time = None;
        self.authenticated = false;
    }

    /// The durable view, without pending-attempt fields.
    pub fn session(&self) -> Session {
        Session {
            principal: self.key.principal(),
            key: self.key.clone(),
            vault_url: self.vault_url.clone(),
            created_at: self.created_at,
        }
    }
}

/// On-disk form of a [`StoredSession`].
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    #[serde(with = "key_seed")]
    key: SessionKey,
    #[serde(with = "crate::util::serde_b64url")]
    public_key_raw: Vec<u8>,
    principal: String,
    vault_url: String,
    created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    authenticated: bool,
}

impl From<&StoredSession> for StoredRecord {
    fn from(session: &StoredSession) -> Self {
        Self {
            key: session.key.clone(),
            public_key_raw: session.public_key_raw.clone(),
            principal: session.principal.clone(),
            vault_url: session.vault_url.clone(),
            created_at: session.created_at,
            auth_state: session.auth_state.clone(),
            auth_start_time: session.auth_start_time,
            authenticated: session.authenticated,
        }
    }
}

impl From<StoredRecord> for StoredSession {
    fn from(record: StoredRecord) -> Self {
        Self {
            key: record.key,
            public_key_raw: record.public_key_raw,
            principal: record.principal,
            vault_url: record.vault_url,
            created_at: record.created_at,
            auth_state: record.auth_state,
            auth_start_time: record.auth_start_time,
            authenticated: record.authenticated,
        }
    }
}

/// An established relying-site session. Sign with
/// [`sign_with_session`](crate::delegation::sign_with_session).
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) key: SessionKey,
    pub principal: Principal,
    pub vault_url: String,
    pub created_at: u64,
}

/// Key/value persistence for [`StoredSession`] records, keyed by vault URL.
pub trait SessionStore {
    fn get(&self, vault_url: &str) -> Result<Option<StoredSession>, StoreError>;

    /// Store `session` under `vault_url`, fully replacing any earlier record.
    fn put(&self, vault_url: &str, session: &StoredSession) -> Result<(), StoreError>;

    fn delete(&self, vault_url: &str) -> Result<(), StoreError>;
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, vault_url: &str) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.sessions.lock().get(vault_url).cloned())
    }

    fn put(&self, vault_url: &str, session: &StoredSession) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .insert(vault_url.to_string(), session.clone());
        Ok(())
    }

    fn delete(&self, vault_url: &str) -> Result<(), StoreError> {
        self.sessions.lock().remove(vault_url);
        Ok(())
    }
}

/// One JSON file per vault URL, replaced atomically with 0600 permissions.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name is the hashed vault URL, so arbitrary URLs map to safe names.
    fn path_for(&self, vault_url: &str) -> PathBuf {
        let digest = Sha256::digest(vault_url.as_bytes());
        self.dir.join(format!("{}.json", b64url_encode(digest)))
    }

    /// All stored sessions, oldest first. Unreadable records are skipped.
    pub fn list(&self) -> Result<Vec<StoredSession>, StoreError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping session record"),
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

fn read_record(path: &Path) -> Result<StoredSession, StoreError> {
    let raw = Zeroizing::new(std::fs::read(path)?);
    serde_json::from_slice::<StoredRecord>(&raw)
        .map(StoredSession::from)
        .map_err(|e| StoreError::Corrupted(e.to_string()))
}

impl SessionStore for FileStore {
    fn get(&self, vault_url: &str) -> Result<Option<StoredSession>, StoreError> {
        let path = self.path_for(vault_url);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    fn put(&self, vault_url: &str, session: &StoredSession) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = Zeroizing::new(
            serde_json::to_vec_pretty(&StoredRecord::from(session))
                .map_err(|e| StoreError::Corrupted(e.to_string()))?,
        );
        let path = self.path_for(vault_url);
        crate::keys::store::write_atomic(&json, &path).map_err(std::io::Error::other)?;
        tracing::debug!(vault_url, path = %path.display(), "stored session");
        Ok(())
    }

    fn delete(&self, vault_url: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(vault_url)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
