//! Sessions command: lists the relying-site sessions stored on this machine.
use owo_colors::{OwoColorize, Stream::Stdout};

use hmvault::keys::{fingerprint, store};
use hmvault::principal::Principal;
use hmvault::session::FileStore;
use hmvault::util::{human_duration, now_millis};

pub fn run_sessions() -> anyhow::Result<()> {
    use comfy_table::{Cell, Color, Table};

    let sessions = FileStore::new(store::sessions_dir()?).list()?;
    if sessions.is_empty() {
        println!(
            "{}",
            "No sessions. Start one with hmvault connect."
                .if_supports_color(Stdout, |t| t.yellow())
        );
        return Ok(());
    }

    let now = now_millis();
    let mut table = Table::new();
    table.set_header(vec!["Vault", "Session", "Age", "Status"]);

    for session in &sessions {
        let session_fp = Principal::decode(&session.principal)
            .map(|p| fingerprint::short_fingerprint(&p))
            .unwrap_or_else(|_| "(invalid)".to_string());
        let age_secs = now.saturating_sub(session.created_at) / 1000;
        let status = if session.is_pending() {
            Cell::new("pending").fg(Color::Yellow)
        } else if session.authenticated {
            Cell::new("authenticated").fg(Color::Green)
        } else {
            Cell::new("idle")
        };
        table.add_row(vec![
            Cell::new(&session.vault_url),
            Cell::new(session_fp),
            Cell::new(human_duration(age_secs)),
            status,
        ]);
    }

    println!("{table}");
    Ok(())
}
