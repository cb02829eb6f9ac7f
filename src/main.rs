mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `HMVAULT_LOG=hmvault=debug`.
const LOG_ENV: &str = "HMVAULT_LOG";

fn init_tracing() {
    // Logs go to stderr so stdout stays clean for URLs and tables
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => commands::init::run_init(args)?,
        Commands::Whoami => commands::whoami::run_whoami()?,
        Commands::Connect(args) => commands::connect::run_connect(args)?,
        Commands::Authorize(args) => commands::authorize::run_authorize(args)?,
        Commands::Callback(args) => commands::callback::run_callback(args)?,
        Commands::Sessions => commands::sessions::run_sessions()?,
        Commands::Verify(args) => commands::verify::run_verify(args)?,
    }

    Ok(())
}
