use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hmvault",
    version,
    about = "Self-custodied identity vault: delegate narrowly-scoped session keys to sites"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or import the account key and seal it under a password
    Init(InitArgs),
    /// Show the account principal and fingerprint
    Whoami,
    /// Start a delegation request against a vault (relying-site side)
    Connect(ConnectArgs),
    /// Validate a delegation request and issue a capability (vault side)
    Authorize(AuthorizeArgs),
    /// Complete a delegation from the vault's callback URL (relying-site side)
    Callback(CallbackArgs),
    /// List stored relying-site sessions
    Sessions,
    /// Verify a signature against an Ed25519 or compressed P-256 public key
    Verify(VerifyArgs),
}

#[derive(Parser)]
pub struct InitArgs {
    /// Account email (salts the password key derivation)
    #[arg(long)]
    pub email: String,

    /// Display name published in the account profile
    #[arg(long)]
    pub name: Option<String>,

    /// Import a 32-byte hex seed from file path or stdin (use - for stdin)
    #[arg(long, value_name = "PATH")]
    pub import: Option<String>,

    /// Skip overwrite confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Parser)]
pub struct ConnectArgs {
    /// Vault URL to send the delegation request to
    #[arg(value_name = "VAULT_URL")]
    pub vault_url: String,

    /// Origin of this site (defaults to the redirect URI's origin)
    #[arg(long, value_name = "ORIGIN")]
    pub client_id: Option<String>,

    /// Where the vault should send the user back (defaults to the client origin)
    #[arg(long, value_name = "URL")]
    pub redirect_uri: Option<String>,

    /// Render the request URL as a QR code
    #[arg(long)]
    pub qr: bool,
}

#[derive(Parser)]
pub struct AuthorizeArgs {
    /// Delegation request URL as received by the vault
    #[arg(value_name = "REQUEST_URL")]
    pub request_url: String,

    /// This vault's origin (defaults to the origin of the request URL)
    #[arg(long, value_name = "ORIGIN")]
    pub origin: Option<String>,

    /// Refuse the request with the given reason
    #[arg(long, value_name = "REASON")]
    pub deny: Option<String>,

    /// Approve without the consent prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Parser)]
pub struct CallbackArgs {
    /// Callback URL the vault redirected to
    #[arg(value_name = "CALLBACK_URL")]
    pub callback_url: String,

    /// Vault URL the request was started against
    #[arg(long, value_name = "VAULT_URL")]
    pub vault: String,
}

#[derive(Parser)]
pub struct VerifyArgs {
    /// Public key in multibase base58btc form (z...)
    #[arg(long, value_name = "MULTIBASE")]
    pub key: String,

    /// 64-byte signature, base64url
    #[arg(long, value_name = "BASE64URL")]
    pub sig: String,

    /// Message text that was signed
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub message: Option<String>,

    /// File whose contents were signed
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}
