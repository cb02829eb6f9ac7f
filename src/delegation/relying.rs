use rand::Rng;
use url::Url;

use super::{
    decode_callback_data, origin_of, query_param, validate_client_id, validate_redirect_uri,
    CallbackData, AUTH_STATE_BYTES, PARAM_CLIENT_ID, PARAM_DATA, PARAM_ERROR, PARAM_PROOF,
    PARAM_REDIRECT_URI, PARAM_SESSION_KEY, PARAM_STATE, PARAM_TS,
};
use crate::blob::{self, Capability, Profile, Timestamp};
use crate::error::DelegationError;
use crate::keys::{Signature, SigningHandle};
use crate::principal::Principal;
use crate::session::{Session, SessionKey, SessionStore, StoredSession};
use crate::util::b64url_encode;

/// What the relying site knows when it starts an auth attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub vault_url: String,
    /// Origin of the relying site. Defaults to the origin of `redirect_uri`.
    pub client_id: Option<String>,
    /// Where the vault sends the user back. Defaults to `client_id`.
    pub redirect_uri: Option<String>,
}

impl AuthConfig {
    pub fn new(vault_url: impl Into<String>) -> Self {
        Self {
            vault_url: vault_url.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    fn resolve(&self) -> Result<(String, String), DelegationError> {
        match (&self.client_id, &self.redirect_uri) {
            (Some(client_id), Some(redirect_uri)) => Ok((client_id.clone(), redirect_uri.clone())),
            (Some(client_id), None) => Ok((client_id.clone(), client_id.clone())),
            (None, Some(redirect_uri)) => {
                let parsed = Url::parse(redirect_uri).map_err(|_| {
                    DelegationError::InvalidRedirectUri(format!("not a valid URL: {}", redirect_uri))
                })?;
                Ok((origin_of(&parsed), redirect_uri.clone()))
            }
            (None, None) => Err(DelegationError::MissingParameter(PARAM_CLIENT_ID)),
        }
    }
}

/// Where the relying site stands with a given vault.
///
/// A failed attempt leaves the vault `Idle`; the reason is carried only by the
/// error returned from [`RelyingSite::handle_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    AuthPending,
    Authenticated,
}

/// A fully verified delegation.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub account_principal: Principal,
    pub capability: Capability,
    pub profile: Profile,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The URL carries neither `data` nor `error`.
    NoCallback,
    Authenticated(Box<AuthResult>),
}

/// The requesting side of the protocol, over a session store keyed by vault URL.
#[derive(Debug)]
pub struct RelyingSite<S> {
    store: S,
}

impl<S: SessionStore> RelyingSite<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Generate a session key and state, persist the pending attempt, and return
    /// the signed request URL to navigate to.
    ///
    /// Any earlier attempt against the same vault is overwritten.
    pub fn start_auth(&self, config: &AuthConfig, now: Timestamp) -> Result<String, DelegationError> {
        let (client_id, redirect_uri) = config.resolve()?;
        validate_client_id(&client_id)?;
        validate_redirect_uri(&redirect_uri, &client_id)?;

        let mut url = Url::parse(&config.vault_url).map_err(|e| {
            DelegationError::InvalidRequestUrl(format!("{}: {}", config.vault_url, e))
        })?;

        let key = SessionKey::generate();
        let principal = key.principal();
        let state = generate_auth_state();

        url.set_query(None);
        url.set_fragment(None);
        url.query_pairs_mut()
            .append_pair(PARAM_CLIENT_ID, &client_id)
            .append_pair(PARAM_REDIRECT_URI, &redirect_uri)
            .append_pair(PARAM_SESSION_KEY, &principal.encode())
            .append_pair(PARAM_STATE, &state)
            .append_pair(PARAM_TS, &now.to_string());

        let signed_url = url.to_string();
        let proof = key.sign(signed_url.as_bytes());
        let delimiter = if signed_url.contains('?') { '&' } else { '?' };
        let request_url = format!(
            "{}{}{}={}",
            signed_url,
            delimiter,
            PARAM_PROOF,
            b64url_encode(proof.0)
        );

        let record = StoredSession::pending(key, &config.vault_url, state, now);
        self.store.put(&config.vault_url, &record)?;
        tracing::debug!(vault_url = %config.vault_url, %client_id, session = %principal, "started auth");
        Ok(request_url)
    }

    /// Validate the vault's redirect back to us.
    ///
    /// Once a pending attempt is found, its pending fields are cleared before any
    /// further check, so every outcome consumes the attempt exactly once.
    pub fn handle_callback(
        &self,
        callback_url: &str,
        vault_url: &str,
    ) -> Result<CallbackOutcome, DelegationError> {
        let url = Url::parse(callback_url)
            .map_err(|e| DelegationError::InvalidCallbackUrl(format!("{}: {}", callback_url, e)))?;
        let data = query_param(&url, PARAM_DATA);
        let error = query_param(&url, PARAM_ERROR);
        if data.is_none() && error.is_none() {
            return Ok(CallbackOutcome::NoCallback);
        }
        let state = query_param(&url, PARAM_STATE).ok_or(DelegationError::MissingState)?;

        let mut record = self
            .store
            .get(vault_url)?
            .ok_or(DelegationError::NoStoredSession)?;
        let expected_state = record
            .auth_state
            .clone()
            .ok_or(DelegationError::NoPendingAuth)?;

        record.clear_pending();
        self.store.put(vault_url, &record)?;

        if expected_state != state {
            tracing::warn!(vault_url, "callback state does not match pending auth");
            return Err(DelegationError::InvalidCallbackState);
        }
        let data = match (error, data) {
            (Some(reason), _) => {
                tracing::warn!(vault_url, %reason, "vault refused delegation");
                return Err(DelegationError::Denied(reason));
            }
            (None, Some(data)) => data,
            (None, None) => return Ok(CallbackOutcome::NoCallback),
        };

        let callback = decode_callback_data(&data)?;
        let session = record.session();
        if let Err(e) = verify_callback(&callback, &session.principal) {
            tracing::warn!(vault_url, error = %e, "rejected delegation callback");
            return Err(e);
        }

        record.authenticated = true;
        self.store.put(vault_url, &record)?;
        tracing::debug!(vault_url, account = %callback.account, "delegation accepted");
        Ok(CallbackOutcome::Authenticated(Box::new(AuthResult {
            account_principal: callback.account,
            capability: callback.capability,
            profile: callback.profile,
            session,
        })))
    }

    pub fn phase(&self, vault_url: &str) -> Result<AuthPhase, DelegationError> {
        Ok(match self.store.get(vault_url)? {
            Some(record) if record.is_pending() => AuthPhase::AuthPending,
            Some(record) if record.authenticated => AuthPhase::Authenticated,
            _ => AuthPhase::Idle,
        })
    }

    /// The durable session for a vault, pending or not.
    pub fn session(&self, vault_url: &str) -> Result<Option<Session>, DelegationError> {
        Ok(self.store.get(vault_url)?.map(|record| record.session()))
    }

    pub fn clear_session(&self, vault_url: &str) -> Result<(), DelegationError> {
        self.store.delete(vault_url)?;
        Ok(())
    }
}

/// Sign arbitrary bytes with the session's non-extractable key.
pub fn sign_with_session(session: &Session, data: &[u8]) -> Signature {
    session.key.sign(data)
}

fn generate_auth_state() -> String {
    let bytes: [u8; AUTH_STATE_BYTES] = rand::thread_rng().gen();
    b64url_encode(bytes)
}

/// Trust checks on the callback payload, in order; the first failure wins.
fn verify_callback(callback: &CallbackData, session: &Principal) -> Result<(), DelegationError> {
    if !blob::verify(&callback.capability) {
        return Err(DelegationError::InvalidCapabilitySignature);
    }
    if !blob::verify(&callback.profile) {
        return Err(DelegationError::InvalidProfileSignature);
    }
    if callback.capability.delegate != *session {
        return Err(DelegationError::DelegateMismatch);
    }
    if callback.account != callback.capability.signer {
        return Err(DelegationError::AccountMismatch);
    }
    if *callback.profile.owner() != callback.account {
        return Err(DelegationError::ProfileOwnerMismatch);
    }
    Ok(())
}
