use std::io::{self, IsTerminal};

use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use crate::cli::AuthorizeArgs;
use crate::commands::prompt_password;
use hmvault::blob::ProfileOptions;
use hmvault::delegation::{self, Vault};
use hmvault::keys::{fingerprint, store};
use hmvault::util::now_millis;

/// Reason sent back when the user declines at the consent prompt.
const ACCESS_DENIED: &str = "access_denied";

pub fn run_authorize(args: AuthorizeArgs) -> anyhow::Result<()> {
    let request = delegation::parse_delegation_request(&args.request_url)?
        .ok_or_else(|| anyhow::anyhow!("URL carries no delegation request"))?;

    let vault_origin = args.origin.as_deref().unwrap_or(&request.vault_origin);
    delegation::verify_delegation_request_proof(&request, vault_origin, now_millis())
        .context("Delegation request rejected")?;

    if let Some(reason) = args.deny.as_deref() {
        let url = delegation::build_error_callback_url(&request.redirect_uri, &request.state, reason)?;
        println!("{}", url);
        return Ok(());
    }

    println!("Site:        {}", request.client_id);
    println!("Redirect:    {}", request.redirect_uri);
    println!("Session key: {}", fingerprint::short_fingerprint(&request.session_key));
    println!();

    let skip_confirm = args.yes;
    if !skip_confirm {
        if !io::stdin().is_terminal() {
            anyhow::bail!("Use --yes to approve in non-interactive mode");
        }
        let approved = dialoguer::Confirm::new()
            .with_prompt(format!("Allow {} to act as you?", request.client_id))
            .default(false)
            .interact()
            .map_err(|e| anyhow::anyhow!("Prompt failed: {}", e))?;
        if !approved {
            let url = delegation::build_error_callback_url(
                &request.redirect_uri,
                &request.state,
                ACCESS_DENIED,
            )?;
            eprintln!("{}", "Request denied.".if_supports_color(Stdout, |t| t.yellow()));
            println!("{}", url);
            return Ok(());
        }
    }

    let envelope = store::load_account()?;
    let password = prompt_password("Enter account password")?;
    let keypair = envelope
        .unlock_with_password(&envelope.email, &password)
        .context("Failed to unlock account")?;

    let vault = Vault::new(
        keypair,
        ProfileOptions {
            name: envelope.name.clone(),
            ..Default::default()
        },
    );
    let callback_url = vault.authorize(&request, now_millis())?;

    eprintln!(
        "{}",
        format!("Delegated to {}.", request.client_id).if_supports_color(Stdout, |t| t.green())
    );
    println!("{}", callback_url);

    Ok(())
}
