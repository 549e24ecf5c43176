use std::sync::Arc;

use clap::Parser;
use crm_session::{
    AuthSessionController, HttpAuthTransport, SessionSettings, StoredDeviceIdentity, SystemClock,
};
use tracing_subscriber::EnvFilter;

mod cli_args;
mod modules;

use crate::cli_args::*;
use crate::modules::auth::{handle_login, handle_logout, handle_refresh, handle_whoami};
use crate::modules::session::{handle_session_command, handle_watch};
use crate::modules::system::build_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut settings = SessionSettings::from_env();
    if let Some(api_url) = cli.api_url.as_deref() {
        settings.api_url = api_url.trim_end_matches('/').to_string();
    }
    let store = build_store(cli.store, &settings.api_url)?;
    let device = Arc::new(StoredDeviceIdentity::new(store.clone()));
    let transport = Arc::new(HttpAuthTransport::new(
        &settings.api_url,
        settings.request_timeout(),
    )?);
    let controller =
        AuthSessionController::new(settings, store, device, transport, Arc::new(SystemClock));

    match cli.command {
        Command::Login(args) => handle_login(&controller, args).await?,
        Command::Logout => handle_logout(&controller).await?,
        Command::Whoami => handle_whoami(&controller)?,
        Command::Refresh => handle_refresh(&controller).await?,
        Command::Session(args) => handle_session_command(&controller, args).await?,
        Command::Watch => handle_watch(&controller).await?,
    }
    Ok(())
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter)?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
