use clap::{ArgGroup, Args};

#[derive(Args)]
#[command(group(ArgGroup::new("limit").args(["revoke_session", "revoke_others"])))]
pub struct LoginArgs {
    #[arg(long, env = "CRM_EMAIL")]
    pub email: String,
    #[arg(long, env = "CRM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    #[arg(long, help = "Session to revoke if the concurrent-session limit is reached")]
    pub revoke_session: Option<String>,
    #[arg(long, help = "Revoke all other sessions if the limit is reached")]
    pub revoke_others: bool,
}
