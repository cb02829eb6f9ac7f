use url::Url;

use super::{
    encode_callback_data, ensure_proof_is_trailing, origin_of, query_param, set_query_params,
    strip_trailing_proof, validate_client_id, validate_redirect_uri, validate_request_timestamp,
    validate_session_key_principal, validate_state, CallbackData, PARAM_CLIENT_ID, PARAM_DATA,
    PARAM_ERROR, PARAM_PROOF, PARAM_REDIRECT_URI, PARAM_SESSION_KEY, PARAM_STATE, PARAM_TS,
    REQUEST_PROOF_FUTURE_SKEW_MS, REQUEST_PROOF_MAX_AGE_MS,
};
use crate::blob::{
    self, Capability, CapabilityOptions, EncodedBlob, Profile, ProfileOptions, Role, Timestamp,
};
use crate::error::DelegationError;
use crate::keys::{verify_ed25519, AccountKeyPair, Signature, SigningHandle, SIGNATURE_SIZE};
use crate::principal::Principal;
use crate::util::b64url_decode;

/// Request parameters in the order the relying site writes them.
const REQUEST_PARAMS: [&str; 6] = [
    PARAM_CLIENT_ID,
    PARAM_REDIRECT_URI,
    PARAM_SESSION_KEY,
    PARAM_STATE,
    PARAM_TS,
    PARAM_PROOF,
];

/// A syntactically valid delegation request, as received by the vault.
///
/// Parsing does not check the proof; call [`verify_delegation_request_proof`]
/// before showing any consent prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationRequest {
    /// The request URL exactly as received, including `proof`.
    pub original_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub session_key: Principal,
    pub state: String,
    pub request_ts: Timestamp,
    pub proof: Signature,
    /// Origin of the URL the request arrived on.
    pub vault_origin: String,
}

/// Parse delegation parameters from a vault URL.
///
/// `Ok(None)` means the URL carries none of the parameters. Any partial set is an
/// error naming the first missing parameter.
pub fn parse_delegation_request(url: &str) -> Result<Option<DelegationRequest>, DelegationError> {
    ensure_proof_is_trailing(url)?;

    let parsed =
        Url::parse(url).map_err(|e| DelegationError::InvalidRequestUrl(format!("{}: {}", url, e)))?;
    let values = REQUEST_PARAMS.map(|name| query_param(&parsed, name));
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }

    let [client_id, redirect_uri, session_key, state, ts, proof] = values;
    let client_id = client_id.ok_or(DelegationError::MissingParameter(PARAM_CLIENT_ID))?;
    let redirect_uri = redirect_uri.ok_or(DelegationError::MissingParameter(PARAM_REDIRECT_URI))?;
    let session_key = session_key.ok_or(DelegationError::MissingParameter(PARAM_SESSION_KEY))?;
    let state = state.ok_or(DelegationError::MissingParameter(PARAM_STATE))?;
    let ts = ts.ok_or(DelegationError::MissingParameter(PARAM_TS))?;
    let proof = proof.ok_or(DelegationError::MissingParameter(PARAM_PROOF))?;

    validate_client_id(&client_id)?;
    validate_redirect_uri(&redirect_uri, &client_id)?;
    let session_key = validate_session_key_principal(&session_key)?;
    validate_state(&state)?;
    let request_ts = validate_request_timestamp(&ts)?;
    let proof = decode_proof_signature(&proof)?;

    Ok(Some(DelegationRequest {
        original_url: url.to_string(),
        client_id,
        redirect_uri,
        session_key,
        state,
        request_ts,
        proof,
        vault_origin: origin_of(&parsed),
    }))
}

fn decode_proof_signature(proof: &str) -> Result<Signature, DelegationError> {
    let bytes = b64url_decode(proof)
        .map_err(|e| DelegationError::InvalidProof(format!("encoding: {}", e)))?;
    Signature::from_slice(&bytes).ok_or_else(|| {
        DelegationError::InvalidProof(format!(
            "expected {} bytes, got {}",
            SIGNATURE_SIZE,
            bytes.len()
        ))
    })
}

/// Check freshness, vault binding, and the session key's signature over the
/// request URL without its trailing `proof`.
pub fn verify_delegation_request_proof(
    request: &DelegationRequest,
    vault_origin: &str,
    now: Timestamp,
) -> Result<(), DelegationError> {
    if request.request_ts < now.saturating_sub(REQUEST_PROOF_MAX_AGE_MS) {
        tracing::warn!(client_id = %request.client_id, ts = request.request_ts, "delegation request expired");
        return Err(DelegationError::Expired);
    }
    if request.request_ts > now.saturating_add(REQUEST_PROOF_FUTURE_SKEW_MS) {
        tracing::warn!(client_id = %request.client_id, ts = request.request_ts, "delegation request from the future");
        return Err(DelegationError::FutureTimestamp);
    }
    if request.vault_origin != vault_origin {
        tracing::warn!(
            expected = vault_origin,
            got = %request.vault_origin,
            "delegation request addressed to another vault"
        );
        return Err(DelegationError::VaultOriginMismatch);
    }

    ensure_proof_is_trailing(&request.original_url)?;
    let payload = strip_trailing_proof(&request.original_url);
    let public_key = request
        .session_key
        .ed25519_key()
        .ok_or_else(|| DelegationError::InvalidSessionKey(request.session_key.encode()))?;

    if !verify_ed25519(&public_key, payload.as_bytes(), &request.proof) {
        tracing::warn!(client_id = %request.client_id, "delegation request proof rejected");
        return Err(DelegationError::ProofMismatch);
    }
    tracing::debug!(client_id = %request.client_id, session = %request.session_key, "delegation request verified");
    Ok(())
}

/// Issue an `AGENT` capability from the account key to a session key.
pub fn create_delegation(
    issuer: &impl SigningHandle,
    session_key: Principal,
    client_id: &str,
    ts: Timestamp,
) -> Result<EncodedBlob<Capability>, DelegationError> {
    let capability = blob::create_capability(
        issuer,
        session_key,
        Role::Agent,
        ts,
        CapabilityOptions {
            label: Some(format!("Session key for {}", client_id)),
            ..Default::default()
        },
    )?;
    Ok(capability)
}

/// Redirect back to the relying site with the signed blobs in a single `data` parameter.
pub fn build_callback_url(
    redirect_uri: &str,
    state: &str,
    account: &Principal,
    capability: &Capability,
    profile: &Profile,
) -> Result<String, DelegationError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| DelegationError::InvalidRedirectUri(format!("{}: {}", redirect_uri, e)))?;
    let data = encode_callback_data(&CallbackData {
        account: account.clone(),
        capability: capability.clone(),
        profile: profile.clone(),
    })?;
    set_query_params(&mut url, &[(PARAM_DATA, &data), (PARAM_STATE, state)]);
    Ok(url.to_string())
}

/// Redirect back with `error=<reason>&state=<state>` and no data.
pub fn build_error_callback_url(
    redirect_uri: &str,
    state: &str,
    reason: &str,
) -> Result<String, DelegationError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| DelegationError::InvalidRedirectUri(format!("{}: {}", redirect_uri, e)))?;
    set_query_params(&mut url, &[(PARAM_ERROR, reason), (PARAM_STATE, state)]);
    Ok(url.to_string())
}

/// The issuing side of the protocol, holding an unlocked account key.
#[derive(Debug)]
pub struct Vault {
    keypair: AccountKeyPair,
    profile: ProfileOptions,
}

impl Vault {
    pub fn new(keypair: AccountKeyPair, profile: ProfileOptions) -> Self {
        Self { keypair, profile }
    }

    pub fn principal(&self) -> Principal {
        self.keypair.principal()
    }

    /// Issue a capability and the account profile for a verified request, and
    /// return the callback URL carrying them.
    pub fn authorize(
        &self,
        request: &DelegationRequest,
        ts: Timestamp,
    ) -> Result<String, DelegationError> {
        let capability =
            create_delegation(&self.keypair, request.session_key.clone(), &request.client_id, ts)?;
        let profile = blob::create_profile(&self.keypair, self.profile.clone(), ts)?;
        tracing::debug!(
            client_id = %request.client_id,
            capability = %capability.cid,
            profile = %profile.cid,
            "issued delegation"
        );
        build_callback_url(
            &request.redirect_uri,
            &request.state,
            &self.principal(),
            &capability.decoded,
            &profile.decoded,
        )
    }

    /// Refuse a request, echoing its state.
    pub fn deny(&self, request: &DelegationRequest, reason: &str) -> Result<String, DelegationError> {
        tracing::debug!(client_id = %request.client_id, reason, "denied delegation");
        build_error_callback_url(&request.redirect_uri, &request.state, reason)
    }
}
