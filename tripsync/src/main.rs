use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tripsync::{
    api::{self, AppState},
    config::{Cli, Command, Config},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => api::run_http_server(cfg).await,
        Command::Token { uid, hours } => {
            let state = AppState::new(cfg).await?;
            let token = state.issue_token_for(&uid, hours).await?;
            println!("{token}");
            Ok(())
        }
    }
}
