use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use crate::cli::ConnectArgs;
use hmvault::delegation::{AuthConfig, RelyingSite};
use hmvault::keys::store;
use hmvault::session::FileStore;
use hmvault::util::now_millis;

pub fn run_connect(args: ConnectArgs) -> anyhow::Result<()> {
    let mut config = AuthConfig::new(&args.vault_url);
    if let Some(client_id) = args.client_id {
        config = config.with_client_id(client_id);
    }
    if let Some(redirect_uri) = args.redirect_uri {
        config = config.with_redirect_uri(redirect_uri);
    }

    let site = RelyingSite::new(FileStore::new(store::sessions_dir()?));
    let request_url = site
        .start_auth(&config, now_millis())
        .context("Failed to start delegation request")?;

    println!(
        "{}",
        "Delegation request created.".if_supports_color(Stdout, |t| t.green())
    );
    println!();
    println!("{}", request_url);
    println!();

    if args.qr {
        qr2term::print_qr(&request_url)
            .map_err(|e| anyhow::anyhow!("QR code render failed: {}", e))?;
        println!();
    }

    println!(
        "Open the URL in the vault, then run 'hmvault callback <url> --vault {}'.",
        args.vault_url
    );

    Ok(())
}
