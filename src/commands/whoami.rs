use hmvault::keys::{fingerprint, store};
use hmvault::principal::Principal;

pub fn run_whoami() -> anyhow::Result<()> {
    let envelope = store::load_account()?;
    let principal = Principal::decode(&envelope.principal)?;
    let account_path = store::account_path()?;

    println!("Principal:   {}", principal);
    println!("Fingerprint: {}", fingerprint::short_fingerprint(&principal));
    println!("Email:       {}", envelope.email);
    if let Some(name) = &envelope.name {
        println!("Name:        {}", name);
    }
    println!(
        "Passkey:     {}",
        if envelope.has_passkey() { "enrolled" } else { "none" }
    );
    println!("Account:     {}", account_path.display());

    Ok(())
}
