/// hmvault library crate: identity blobs, the account envelope, and the
/// session-key delegation protocol, shared by the CLI and integration tests.
pub mod blob;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod keys;
pub mod principal;
pub mod session;
pub mod util;
pub mod verify;
