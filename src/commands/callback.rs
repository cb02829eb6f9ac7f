use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use crate::cli::CallbackArgs;
use hmvault::blob::{self, Role};
use hmvault::delegation::{CallbackOutcome, RelyingSite};
use hmvault::keys::{fingerprint, store};
use hmvault::session::FileStore;

pub fn run_callback(args: CallbackArgs) -> anyhow::Result<()> {
    let site = RelyingSite::new(FileStore::new(store::sessions_dir()?));
    let outcome = site
        .handle_callback(&args.callback_url, &args.vault)
        .context("Delegation failed")?;

    let result = match outcome {
        CallbackOutcome::NoCallback => {
            println!("URL carries no delegation response.");
            return Ok(());
        }
        CallbackOutcome::Authenticated(result) => result,
    };

    let capability_cid = blob::cid_for(&blob::to_cbor(&result.capability)?);
    println!(
        "{}",
        "Delegation verified.".if_supports_color(Stdout, |t| t.green())
    );
    println!();
    println!("Account:     {}", result.account_principal);
    if let Some(name) = &result.profile.name {
        println!("Name:        {}", name);
    }
    println!(
        "Session:     {}",
        fingerprint::short_fingerprint(&result.session.principal)
    );
    println!("Capability:  {}", capability_cid);
    println!(
        "Role:        {}",
        match result.capability.role {
            Role::Agent => "AGENT",
            Role::Writer => "WRITER",
        }
    );

    Ok(())
}
