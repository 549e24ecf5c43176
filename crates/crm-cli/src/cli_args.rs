use clap::{ArgAction, Parser, Subcommand};
use crm_keystore::StoreKind;

pub use crate::modules::auth::args::*;
pub use crate::modules::session::args::*;

#[derive(Parser)]
#[command(name = "crm")]
#[command(about = "CRM session client")]
pub struct Cli {
    #[arg(long, env = "CRM_API_URL")]
    pub api_url: Option<String>,
    #[arg(long, env = "CRM_STORE", default_value = "keyring", value_parser = parse_store_kind)]
    pub store: StoreKind,
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Login(LoginArgs),
    Logout,
    Whoami,
    #[command(about = "Renew the access token now")]
    Refresh,
    Session(SessionArgs),
    #[command(about = "Keep the session alive until Ctrl-C or invalidation")]
    Watch,
}

fn parse_store_kind(value: &str) -> Result<StoreKind, String> {
    value.parse()
}
