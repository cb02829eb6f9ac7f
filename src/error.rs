use thiserror::Error;

/// CLI-level failures around the local account file.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("No account found. Run `hmvault init` first.")]
    NoAccountFound,

    #[error("Failed to write file atomically")]
    AtomicWriteFailed(#[source] std::io::Error),

    #[error("Cannot determine home directory")]
    HomeDirNotFound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("invalid multibase: expected base58btc prefix 'z'")]
    MissingMultibasePrefix,

    #[error("invalid base58 payload: {0}")]
    InvalidBase58(String),

    #[error("invalid multicodec: expected ed25519-pub (0xED 0x01)")]
    InvalidMulticodec,

    #[error("invalid principal length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("failed to encode blob: {0}")]
    Encode(String),

    #[error("failed to decode blob: {0}")]
    Decode(String),

    #[error("unsupported blob type: {0}")]
    UnknownType(String),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption key must be at least 32 bytes, got {0}")]
    KeyTooShort(usize),

    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("unwrapped key has wrong size: {got} bytes (expected {expected})")]
    InvalidKeyMaterial { expected: usize, got: usize },

    #[error("PRF not supported by this authenticator")]
    PrfUnsupported,

    #[error("PRF is enabled for this credential but no result was returned")]
    PrfResultMissing,

    #[error("PRF output must be 32 bytes, got {0}")]
    InvalidPrfOutput(usize),

    #[error("no passkey is registered for this account")]
    NoPasskey,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("invalid base64url field '{0}'")]
    InvalidEncoding(&'static str),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record is corrupted: {0}")]
    Corrupted(String),
}

#[derive(Error, Debug)]
pub enum DelegationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid client_id: {0}")]
    InvalidClientId(String),

    #[error("Invalid redirect_uri: {0}")]
    InvalidRedirectUri(String),

    #[error("Invalid redirect_uri: origin \"{redirect}\" does not match client_id \"{client}\"")]
    RedirectOriginMismatch { redirect: String, client: String },

    #[error("Invalid session_key principal: {0}")]
    InvalidSessionKey(String),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid ts: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid delegation request URL: {0}")]
    InvalidRequestUrl(String),

    #[error("Invalid delegation request URL: proof must be the final query parameter")]
    ProofNotTrailing,

    #[error("Invalid proof signature: {0}")]
    InvalidProof(String),

    #[error("Delegation request proof expired")]
    Expired,

    #[error("Delegation request proof timestamp is in the future")]
    FutureTimestamp,

    #[error("Delegation request vault origin mismatch")]
    VaultOriginMismatch,

    #[error("Request proof signature does not match session key")]
    ProofMismatch,

    #[error("Missing callback state")]
    MissingState,

    #[error("Invalid callback URL: {0}")]
    InvalidCallbackUrl(String),

    #[error("No stored session found for this vault. Was start_auth called first?")]
    NoStoredSession,

    #[error("No pending auth state found for this vault. Was start_auth called first?")]
    NoPendingAuth,

    #[error("Invalid callback state")]
    InvalidCallbackState,

    #[error("Delegation error: {0}")]
    Denied(String),

    #[error("Invalid callback data: {0}")]
    InvalidCallbackData(String),

    #[error("Invalid capability signature")]
    InvalidCapabilitySignature,

    #[error("Invalid profile signature")]
    InvalidProfileSignature,

    #[error("Capability delegate does not match local session key")]
    DelegateMismatch,

    #[error("Callback account does not match capability signer")]
    AccountMismatch,

    #[error("Callback account does not match profile owner")]
    ProfileOwnerMismatch,

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("unsupported public key format ({0} bytes)")]
    UnsupportedKey(usize),

    #[error("invalid compression tag 0x{0:02x}")]
    InvalidCompressionTag(u8),

    #[error("x coordinate is not a field element")]
    InvalidCoordinate,

    #[error("point is not on the curve")]
    NotOnCurve,

    #[error("signature must be 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("malformed signature")]
    MalformedSignature,

    #[error("signature verification failed")]
    BadSignature,
}
