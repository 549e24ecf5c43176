use clap::{Args, Subcommand};

#[derive(Args)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand)]
pub enum SessionCommand {
    #[command(about = "Show the server-side session of this device")]
    Status(SessionStatusArgs),
    #[command(about = "Revoke a session of this account")]
    Revoke(SessionRevokeArgs),
}

#[derive(Args)]
pub struct SessionStatusArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SessionRevokeArgs {
    pub session_id: String,
}
