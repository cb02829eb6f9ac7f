//! Delegation protocol shared by both sides of the flow.
//!
//! A relying site ([`RelyingSite`]) asks a vault for a capability bound to a fresh
//! session key; the vault ([`Vault`]) validates the signed request, issues the
//! capability with the account key, and redirects back with the signed blobs.
//! Request URL: `client_id, redirect_uri, session_key, state, ts, proof` (proof last).
//! Callback URL: `data=<base64url(gzip(dag-cbor))>&state=..` or `error=..&state=..`.

mod relying;
mod vault;

pub use relying::{sign_with_session, AuthConfig, AuthPhase, AuthResult, CallbackOutcome, RelyingSite};
pub use vault::{
    build_callback_url, build_error_callback_url, create_delegation, parse_delegation_request,
    verify_delegation_request_proof, DelegationRequest, Vault,
};

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Read;
use url::Url;

use crate::blob::{self, Capability, Profile};
use crate::error::DelegationError;
use crate::principal::Principal;
use crate::util::{b64url_decode, b64url_encode};

pub const PARAM_CLIENT_ID: &str = "client_id";
pub const PARAM_REDIRECT_URI: &str = "redirect_uri";
pub const PARAM_SESSION_KEY: &str = "session_key";
pub const PARAM_STATE: &str = "state";
pub const PARAM_TS: &str = "ts";
pub const PARAM_PROOF: &str = "proof";
pub const PARAM_DATA: &str = "data";
pub const PARAM_ERROR: &str = "error";

/// Random bytes in a callback correlation state.
pub const AUTH_STATE_BYTES: usize = 16;

/// Oldest request timestamp the vault accepts.
pub const REQUEST_PROOF_MAX_AGE_MS: u64 = 5 * 60 * 1000;

/// How far ahead of the vault clock a request timestamp may be.
pub const REQUEST_PROOF_FUTURE_SKEW_MS: u64 = 60 * 1000;

/// Upper bound on the decompressed callback payload.
pub const MAX_CALLBACK_DATA_BYTES: u64 = 1024 * 1024;

/// Payload of the `data` callback parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackData {
    pub account: Principal,
    pub capability: Capability,
    pub profile: Profile,
}

fn is_localhost(host: Option<&str>) -> bool {
    matches!(host, Some("localhost") | Some("127.0.0.1"))
}

fn is_secure_scheme(url: &Url) -> bool {
    url.scheme() == "https" || (url.scheme() == "http" && is_localhost(url.host_str()))
}

/// The web origin of an absolute URL, e.g. `https://example.com:8443`.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// A client ID must be a bare https origin (http only for localhost).
pub fn validate_client_id(client_id: &str) -> Result<(), DelegationError> {
    let parsed = Url::parse(client_id)
        .map_err(|_| DelegationError::InvalidClientId(format!("not a valid URL: {}", client_id)))?;

    if !is_secure_scheme(&parsed) {
        return Err(DelegationError::InvalidClientId(format!(
            "must use HTTPS (HTTP allowed only for localhost): {}",
            client_id
        )));
    }
    if !matches!(parsed.path(), "" | "/") {
        return Err(DelegationError::InvalidClientId(format!(
            "must not have a path: {}",
            client_id
        )));
    }
    if parsed.query().is_some_and(|q| !q.is_empty()) {
        return Err(DelegationError::InvalidClientId(format!(
            "must not have a query string: {}",
            client_id
        )));
    }
    if parsed.fragment().is_some_and(|f| !f.is_empty()) {
        return Err(DelegationError::InvalidClientId(format!(
            "must not have a fragment: {}",
            client_id
        )));
    }
    Ok(())
}

/// A redirect URI must be https (http only for localhost) and share the client's origin.
pub fn validate_redirect_uri(redirect_uri: &str, client_id: &str) -> Result<(), DelegationError> {
    let parsed = Url::parse(redirect_uri).map_err(|_| {
        DelegationError::InvalidRedirectUri(format!("not a valid URL: {}", redirect_uri))
    })?;
    if !is_secure_scheme(&parsed) {
        return Err(DelegationError::InvalidRedirectUri(format!(
            "must use HTTPS (HTTP allowed only for localhost): {}",
            redirect_uri
        )));
    }

    let client = Url::parse(client_id)
        .map_err(|_| DelegationError::InvalidClientId(format!("not a valid URL: {}", client_id)))?;
    let redirect_origin = origin_of(&parsed);
    let client_origin = origin_of(&client);
    if redirect_origin != client_origin {
        return Err(DelegationError::RedirectOriginMismatch {
            redirect: redirect_origin,
            client: client_origin,
        });
    }
    Ok(())
}

pub fn validate_session_key_principal(session_key: &str) -> Result<Principal, DelegationError> {
    Principal::decode(session_key)
        .map_err(|_| DelegationError::InvalidSessionKey(session_key.to_string()))
}

/// State must be base64url carrying at least 128 bits.
pub fn validate_state(state: &str) -> Result<(), DelegationError> {
    let well_formed = !state.is_empty()
        && state
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !well_formed {
        return Err(DelegationError::InvalidState("must be base64url"));
    }
    let decoded = b64url_decode(state).map_err(|_| DelegationError::InvalidState("must be base64url"))?;
    if decoded.len() < AUTH_STATE_BYTES {
        return Err(DelegationError::InvalidState("must be at least 128 bits"));
    }
    Ok(())
}

/// `ts` must be a positive integer (unix ms).
pub fn validate_request_timestamp(ts: &str) -> Result<u64, DelegationError> {
    match ts.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(DelegationError::InvalidTimestamp(ts.to_string())),
    }
}

fn has_proof_param(url: &str) -> bool {
    let needle = format!("{}=", PARAM_PROOF);
    url.contains(&format!("?{}", needle)) || url.contains(&format!("&{}", needle))
}

/// Remove a trailing `[?&]proof=<value>` from the raw URL string, byte-exact.
///
/// Returns the input unchanged when `proof` is absent or not the last parameter.
pub fn strip_trailing_proof(url: &str) -> &str {
    let needle = format!("{}=", PARAM_PROOF);
    for (idx, _) in url.match_indices(needle.as_str()) {
        if idx == 0 || !matches!(url.as_bytes()[idx - 1], b'?' | b'&') {
            continue;
        }
        let value = &url[idx + needle.len()..];
        if !value.contains(|c: char| c == '&' || c == '#') {
            return &url[..idx - 1];
        }
    }
    url
}

pub fn ensure_proof_is_trailing(url: &str) -> Result<(), DelegationError> {
    if has_proof_param(url) && strip_trailing_proof(url) == url {
        return Err(DelegationError::ProofNotTrailing);
    }
    Ok(())
}

/// First value of a query parameter, treating an empty value as absent.
pub(crate) fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Set query parameters, replacing any existing values with the same names.
pub(crate) fn set_query_params(url: &mut Url, params: &[(&str, &str)]) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !params.iter().any(|(name, _)| key == name))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    pairs.extend_pairs(kept);
    for (name, value) in params {
        pairs.append_pair(name, value);
    }
}

/// `base64url(gzip(dag-cbor(data)))`.
pub fn encode_callback_data(data: &CallbackData) -> Result<String, DelegationError> {
    let cbor = blob::to_cbor(data)?;
    let mut compressed = Vec::new();
    GzEncoder::new(cbor.as_slice(), Compression::default())
        .read_to_end(&mut compressed)
        .map_err(|e| DelegationError::InvalidCallbackData(format!("gzip: {}", e)))?;
    Ok(b64url_encode(compressed))
}

pub fn decode_callback_data(encoded: &str) -> Result<CallbackData, DelegationError> {
    let compressed = b64url_decode(encoded)
        .map_err(|e| DelegationError::InvalidCallbackData(format!("base64url: {}", e)))?;

    let mut cbor = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .take(MAX_CALLBACK_DATA_BYTES + 1)
        .read_to_end(&mut cbor)
        .map_err(|e| DelegationError::InvalidCallbackData(format!("gzip: {}", e)))?;
    if cbor.len() as u64 > MAX_CALLBACK_DATA_BYTES {
        return Err(DelegationError::InvalidCallbackData(format!(
            "payload exceeds {} bytes",
            MAX_CALLBACK_DATA_BYTES
        )));
    }

    blob::from_cbor(&cbor).map_err(|e| DelegationError::InvalidCallbackData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_client_id() {
        validate_client_id("https://example.com").unwrap();
        validate_client_id("https://example.com/").unwrap();
        validate_client_id("https://example.com:8443").unwrap();
        validate_client_id("http://localhost:3000").unwrap();
        validate_client_id("http://127.0.0.1:8080").unwrap();

        for bad in [
            "example.com",
            "http://example.com",
            "ftp://example.com",
            "https://example.com/app",
            "https://example.com?x=1",
            "https://example.com#frag",
        ] {
            assert!(
                matches!(validate_client_id(bad), Err(DelegationError::InvalidClientId(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_validate_redirect_uri() {
        validate_redirect_uri("https://example.com/callback?x=1", "https://example.com").unwrap();
        validate_redirect_uri("http://localhost:3000/cb", "http://localhost:3000").unwrap();

        let err = validate_redirect_uri("https://evil.com/callback", "https://example.com").unwrap_err();
        assert!(
            err.to_string().contains("does not match"),
            "unexpected message: {}",
            err
        );

        assert!(matches!(
            validate_redirect_uri("https://example.com:444/cb", "https://example.com"),
            Err(DelegationError::RedirectOriginMismatch { .. })
        ));
        assert!(matches!(
            validate_redirect_uri("http://example.com/cb", "https://example.com"),
            Err(DelegationError::InvalidRedirectUri(_))
        ));
    }

    #[test]
    fn test_validate_state() {
        validate_state(&b64url_encode([7u8; 16])).unwrap();
        validate_state(&b64url_encode([7u8; 32])).unwrap();
        assert!(validate_state(&b64url_encode([7u8; 15])).is_err());
        assert!(validate_state("not base64url!").is_err());
        assert!(validate_state("").is_err());
        assert!(validate_state("abc+/abcabcabcabcabcabc").is_err());
    }

    #[test]
    fn test_validate_request_timestamp() {
        assert_eq!(validate_request_timestamp("1700000000000").unwrap(), 1_700_000_000_000);
        for bad in ["0", "-5", "1.5", "abc", ""] {
            assert!(validate_request_timestamp(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_validate_session_key_principal() {
        let principal = Principal::from_ed25519(&[1u8; 32]);
        assert_eq!(
            validate_session_key_principal(&principal.encode()).unwrap(),
            principal
        );
        assert!(validate_session_key_principal("z123").is_err());
    }

    #[test]
    fn test_strip_trailing_proof() {
        assert_eq!(strip_trailing_proof("https://v.io/?a=1&proof=abc"), "https://v.io/?a=1");
        assert_eq!(strip_trailing_proof("https://v.io/?proof=abc"), "https://v.io/");
        assert_eq!(
            strip_trailing_proof("https://v.io/?proof=abc&a=1"),
            "https://v.io/?proof=abc&a=1"
        );
        assert_eq!(
            strip_trailing_proof("https://v.io/?a=1&proof=abc#frag"),
            "https://v.io/?a=1&proof=abc#frag"
        );
        assert_eq!(strip_trailing_proof("https://v.io/?xproof=abc"), "https://v.io/?xproof=abc");
    }

    #[test]
    fn test_ensure_proof_is_trailing() {
        ensure_proof_is_trailing("https://v.io/?a=1&proof=abc").unwrap();
        ensure_proof_is_trailing("https://v.io/?a=1").unwrap();
        assert!(matches!(
            ensure_proof_is_trailing("https://v.io/?proof=abc&a=1"),
            Err(DelegationError::ProofNotTrailing)
        ));
    }

    #[test]
    fn test_set_query_params_replaces_existing() {
        let mut url = Url::parse("https://example.com/cb?keep=1&state=old").unwrap();
        set_query_params(&mut url, &[(PARAM_DATA, "d"), (PARAM_STATE, "new")]);
        assert_eq!(url.as_str(), "https://example.com/cb?keep=1&data=d&state=new");
        assert_eq!(query_param(&url, PARAM_STATE).as_deref(), Some("new"));
    }

    #[test]
    fn test_query_param_treats_empty_as_missing() {
        let url = Url::parse("https://example.com/?a=&b=2").unwrap();
        assert_eq!(query_param(&url, "a"), None);
        assert_eq!(query_param(&url, "b").as_deref(), Some("2"));
        assert_eq!(query_param(&url, "c"), None);
    }

    #[test]
    fn test_decode_callback_data_rejects_garbage() {
        assert!(matches!(
            decode_callback_data("!!!"),
            Err(DelegationError::InvalidCallbackData(_))
        ));
        assert!(matches!(
            decode_callback_data(&b64url_encode(b"not gzip")),
            Err(DelegationError::InvalidCallbackData(_))
        ));
    }

    #[test]
    fn test_decode_callback_data_caps_decompressed_size() {
        let zeros = vec![0u8; (MAX_CALLBACK_DATA_BYTES + 10) as usize];
        let mut compressed = Vec::new();
        GzEncoder::new(zeros.as_slice(), Compression::best())
            .read_to_end(&mut compressed)
            .unwrap();
        let err = decode_callback_data(&b64url_encode(compressed)).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "got {}", err);
    }
}
