use std::io::{self, IsTerminal, Read};
use std::path::Path;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};
use zeroize::Zeroizing;

use crate::cli::InitArgs;
use hmvault::crypto::{self, AccountEnvelope, KdfParams, PasswordStrength};
use hmvault::keys::{fingerprint, store, AccountKeyPair, SigningHandle};
use hmvault::principal::Principal;

const MIN_PASSWORD_LEN: usize = 8;

pub fn run_init(args: InitArgs) -> anyhow::Result<()> {
    store::ensure_data_dir().context("Failed to create data directory")?;
    let account_path = store::account_path()?;

    // Overwrite guard
    if store::account_exists()? && !args.yes && !prompt_overwrite(&account_path)? {
        println!("Aborted.");
        return Ok(());
    }

    let (keypair, action) = match args.import.as_deref() {
        Some("-") => (import_from_stdin()?, "imported"),
        Some(path) => (import_from_file(path)?, "imported"),
        None => (AccountKeyPair::generate(), "generated"),
    };

    if !io::stdin().is_terminal() {
        anyhow::bail!("Password prompt requires an interactive terminal");
    }
    let password = Zeroizing::new(
        dialoguer::Password::new()
            .with_prompt(format!("Enter account password (min {} chars)", MIN_PASSWORD_LEN))
            .with_confirmation("Confirm password", "Passwords don't match")
            .interact()
            .map_err(|e| anyhow::anyhow!("Password prompt failed: {}", e))?,
    );
    if password.len() < MIN_PASSWORD_LEN {
        anyhow::bail!("Password must be at least {} characters", MIN_PASSWORD_LEN);
    }
    match crypto::password_strength(&password) {
        PasswordStrength::Weak => eprintln!(
            "{}",
            "Warning: weak password. Mix upper/lower case, digits and symbols."
                .if_supports_color(Stdout, |t| t.yellow())
        ),
        PasswordStrength::Medium | PasswordStrength::Strong => {}
    }

    let mut envelope = AccountEnvelope::seal(&keypair, &args.email, &password, KdfParams::default())
        .context("Failed to seal account")?;
    envelope.name = args.name;
    let path = store::write_account(&envelope)?;

    let principal = keypair.principal();
    println!(
        "{}",
        format!("Account {} successfully.", action).if_supports_color(Stdout, |t| t.green())
    );
    println!();
    println!("Principal:   {}", principal);
    println!("Fingerprint: {}", fingerprint::short_fingerprint(&principal));
    println!("Email:       {}", envelope.email);
    println!("Account:     {} (password-protected)", path.display());
    println!();
    println!("Next: run 'hmvault authorize <request-url>' to approve a site.");

    Ok(())
}

fn prompt_overwrite(existing: &Path) -> anyhow::Result<bool> {
    if !io::stdin().is_terminal() {
        eprintln!("Use --yes to confirm overwrite in non-interactive mode");
        return Ok(false);
    }

    let identifier = match store::load_account() {
        Ok(envelope) => Principal::decode(&envelope.principal)
            .map(|p| fingerprint::short_fingerprint(&p))
            .unwrap_or_else(|_| "(unreadable)".to_string()),
        Err(_) => "(unreadable)".to_string(),
    };

    dialoguer::Confirm::new()
        .with_prompt(format!(
            "Account {} already exists at {}. Overwrite?",
            identifier,
            existing.display()
        ))
        .default(false)
        .interact()
        .map_err(|e| anyhow::anyhow!("Prompt failed: {}", e))
}

fn import_from_file(path: &str) -> anyhow::Result<AccountKeyPair> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file at {}", path))?;
    parse_seed(&raw).with_context(|| format!("Invalid key file at {}", path))
}

fn import_from_stdin() -> anyhow::Result<AccountKeyPair> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read from stdin")?;
    if buf.trim().is_empty() {
        anyhow::bail!("No key data received from stdin");
    }
    parse_seed(&buf).context("Invalid key data from stdin")
}

/// Parse a 32-byte Ed25519 seed written as 64 hex characters.
fn parse_seed(text: &str) -> anyhow::Result<AccountKeyPair> {
    let text = text.trim();
    if text.len() != 64 {
        anyhow::bail!("expected 64 hex characters, got {}", text.len());
    }
    let mut seed = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(text, &mut seed[..])
        .map_err(|e| anyhow::anyhow!("expected 64 hex characters: {}", e))?;
    Ok(AccountKeyPair::from_seed(&seed))
}
