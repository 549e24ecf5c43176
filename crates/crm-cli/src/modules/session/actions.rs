use std::sync::Arc;

use crm_session::{AuthSessionController, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli_args::*;
use crate::modules::session::print_session;

pub(crate) async fn handle_session_command(
    controller: &Arc<AuthSessionController>,
    args: SessionArgs,
) -> anyhow::Result<()> {
    match args.command {
        SessionCommand::Status(status) => {
            if controller.restore().await?.is_none() {
                anyhow::bail!("not logged in");
            }
            let Some(session) = controller.check_session().await? else {
                anyhow::bail!("server has no active session for this device");
            };
            if status.json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                print_session(&session);
            }
        }
        SessionCommand::Revoke(revoke) => {
            if controller.restore().await?.is_none() {
                anyhow::bail!("not logged in");
            }
            controller.revoke_session(&revoke.session_id).await?;
            if controller.is_authenticated() {
                println!("Revoked session {}", revoke.session_id);
            } else {
                println!("Revoked current session; logged out");
            }
        }
    }
    Ok(())
}

/// Keeps refresh and validation running in the foreground. Returns an error
/// when the server invalidates the session.
pub(crate) async fn handle_watch(controller: &Arc<AuthSessionController>) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    let Some(user) = controller.restore().await? else {
        anyhow::bail!("not logged in");
    };
    println!(
        "Watching session for {} (Ctrl-C to stop)",
        user.email.as_deref().unwrap_or(&user.id)
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(event = "watch_interrupted");
                return Ok(());
            }
            received = events.recv() => match received {
                Ok(SessionEvent::Refreshed) => {
                    let state = controller.refresh_state();
                    match state.next_refresh_at {
                        Some(at) => println!("Token refreshed; next refresh at {}", at.to_rfc3339()),
                        None => println!("Token refreshed"),
                    }
                }
                Ok(SessionEvent::Invalidated { reason }) => {
                    anyhow::bail!("session invalidated: {reason}");
                }
                Ok(SessionEvent::LoggedOut) => {
                    println!("Logged out");
                    return Ok(());
                }
                Ok(SessionEvent::LoggedIn { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(event = "watch_events_lagged", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}
