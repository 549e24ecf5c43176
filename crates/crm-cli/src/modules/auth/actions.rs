use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use crm_core::{SessionLimitError, User};
use crm_session::{AuthError, AuthSessionController, RefreshOutcome, Resolution, SessionEvent};
use tracing::debug;

use crate::cli_args::*;
use crate::modules::session::print_session_table;
use crate::modules::system::{prompt_line, prompt_password};

const COALESCED_REFRESH_WAIT: Duration = Duration::from_secs(30);

pub(crate) async fn handle_login(
    controller: &Arc<AuthSessionController>,
    args: LoginArgs,
) -> anyhow::Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt_password("Password: ")?,
    };

    let user = match controller.login(&args.email, &password).await {
        Ok(user) => user,
        Err(AuthError::SessionLimitExceeded(limit)) => {
            let resolution = match (args.revoke_session, args.revoke_others) {
                (Some(session_id), _) => Resolution::RevokeSession(session_id),
                (None, true) => Resolution::RevokeOthers,
                (None, false) => match choose_resolution(&limit)? {
                    Some(resolution) => resolution,
                    None => {
                        controller.cancel_session_limit();
                        anyhow::bail!("login cancelled");
                    }
                },
            };
            debug!(event = "session_limit_resolution", ?resolution);
            controller.resolve_session_limit(resolution).await?
        }
        Err(err) => return Err(err.into()),
    };

    println!("Logged in as {}", display_user(&user));
    Ok(())
}

/// Asks which session to give up. `None` means the user backed out.
fn choose_resolution(limit: &SessionLimitError) -> anyhow::Result<Option<Resolution>> {
    println!(
        "Session limit reached ({} of {} active{}).",
        limit.current_active_sessions,
        limit.max_concurrent_sessions,
        limit
            .plan
            .as_deref()
            .map(|plan| format!(", plan {plan}"))
            .unwrap_or_default()
    );
    print_session_table(&limit.active_sessions, None);

    if !std::io::stdin().is_terminal() {
        anyhow::bail!("session limit reached; rerun with --revoke-session <ID> or --revoke-others");
    }

    loop {
        let answer = prompt_line("Session to revoke, 'all' for every other session, empty to cancel: ")?;
        match answer.as_str() {
            "" => return Ok(None),
            "all" => return Ok(Some(Resolution::RevokeOthers)),
            id if limit.find_session(id).is_some() => {
                return Ok(Some(Resolution::RevokeSession(id.to_string())));
            }
            id => println!("No active session {id}"),
        }
    }
}

pub(crate) async fn handle_logout(controller: &Arc<AuthSessionController>) -> anyhow::Result<()> {
    controller.logout().await?;
    println!("Logged out");
    Ok(())
}

pub(crate) fn handle_whoami(controller: &Arc<AuthSessionController>) -> anyhow::Result<()> {
    let Some(user) = controller.current_user() else {
        anyhow::bail!("not logged in");
    };
    println!("{}", display_user(&user));
    if let Some(tenant) = user.tenant_id.as_deref() {
        println!("tenant: {tenant}");
    }
    if let Some(role) = user.role.as_deref() {
        println!("role: {role}");
    }
    Ok(())
}

pub(crate) async fn handle_refresh(controller: &Arc<AuthSessionController>) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    if controller.restore().await?.is_none() {
        anyhow::bail!("not logged in");
    }

    match controller.force_refresh().await? {
        RefreshOutcome::Refreshed => {}
        RefreshOutcome::Coalesced => {
            // The restore already started a refresh; wait for its result.
            let waited = tokio::time::timeout(COALESCED_REFRESH_WAIT, async {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::Refreshed) => return Ok(()),
                        Ok(SessionEvent::Invalidated { reason }) => {
                            return Err(anyhow::anyhow!("session invalidated: {reason}"));
                        }
                        Ok(_) => {}
                        Err(err) => return Err(anyhow::anyhow!("event stream closed: {err}")),
                    }
                }
            })
            .await;
            match waited {
                Ok(result) => result?,
                Err(_) => anyhow::bail!("timed out waiting for token refresh"),
            }
        }
        RefreshOutcome::Discarded => anyhow::bail!("session ended during refresh"),
    }

    let state = controller.refresh_state();
    match state.next_refresh_at {
        Some(at) => println!("Token refreshed; next refresh at {}", at.to_rfc3339()),
        None => println!("Token refreshed"),
    }
    Ok(())
}

fn display_user(user: &User) -> String {
    match (user.email.as_deref(), user.name.as_deref()) {
        (Some(email), Some(name)) => format!("{name} <{email}>"),
        (Some(email), None) => email.to_string(),
        (None, Some(name)) => name.to_string(),
        (None, None) => user.id.clone(),
    }
}
