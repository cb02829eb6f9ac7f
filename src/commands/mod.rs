pub mod authorize;
pub mod callback;
pub mod connect;
pub mod init;
pub mod sessions;
pub mod verify;
pub mod whoami;

use std::io::{self, IsTerminal};
use zeroize::Zeroizing;

/// Prompt for the account password on an interactive terminal.
pub(crate) fn prompt_password(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    if !io::stdin().is_terminal() {
        anyhow::bail!("Password prompt requires an interactive terminal");
    }
    let password = dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| anyhow::anyhow!("Password prompt failed: {}", e))?;
    Ok(Zeroizing::new(password))
}
