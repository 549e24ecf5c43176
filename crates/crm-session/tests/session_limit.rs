mod support;

use crm_session::{AuthError, Authorization, LimitPhase, Resolution};
use support::{Harness, DEVICE_ID, MANAGEMENT_TOKEN, PASSWORD};

fn at_capacity(harness: &Harness) {
    harness.transport.set_max_sessions(3);
    harness.transport.seed_session("session-a", "device-a");
    harness.transport.seed_session("session-b", "device-b");
    harness.transport.seed_session("session-c", "device-c");
}

#[tokio::test(start_paused = true)]
async fn revoking_one_session_lets_the_login_through() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();

    let limit = match controller.login("ada@example.com", PASSWORD).await {
        Err(AuthError::SessionLimitExceeded(limit)) => limit,
        other => panic!("expected session limit, got {other:?}"),
    };
    assert_eq!(limit.active_sessions.len(), 3);
    assert_eq!(limit.max_concurrent_sessions, 3);
    assert_eq!(limit.management_token, None);
    assert_eq!(controller.session_limit_phase(), LimitPhase::AwaitingResolution);
    assert!(!controller.is_authenticated());

    let user = controller
        .resolve_session_limit(Resolution::RevokeSession("session-b".to_string()))
        .await
        .expect("resolved login");

    assert_eq!(user.id, "user-1");
    assert_eq!(harness.transport.login_count(), 2);
    assert_eq!(controller.session_limit_phase(), LimitPhase::Idle);
    assert!(controller.is_authenticated());
    assert!(controller.refresh_state().running);
    let mut remaining = harness.transport.session_ids();
    remaining.sort();
    assert_eq!(remaining, vec!["session-1", "session-a", "session-c"]);

    let revokes = harness.transport.revokes();
    assert_eq!(revokes.len(), 1);
    assert_eq!(revokes[0].session_id.as_deref(), Some("session-b"));
    assert_eq!(revokes[0].reason, "session_limit");
    assert_eq!(
        revokes[0].auth,
        Authorization::Management(MANAGEMENT_TOKEN.to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn revoking_other_sessions_then_logging_in_again_succeeds() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();

    let first = controller.login("ada@example.com", PASSWORD).await;
    assert!(matches!(first, Err(AuthError::SessionLimitExceeded(_))));

    let user = controller
        .resolve_session_limit(Resolution::RevokeOthers)
        .await
        .expect("resolved login");

    assert_eq!(user.id, "user-1");
    assert!(controller.refresh_state().running);
    assert!(controller.is_validating());
    let revokes = harness.transport.revokes();
    assert_eq!(revokes.len(), 1);
    assert_eq!(revokes[0].keep_device_id.as_deref(), Some(DEVICE_ID));

    controller.logout().await.expect("logout");
    let again = controller.login("ada@example.com", PASSWORD).await;
    assert!(again.is_ok(), "second login should not hit the cap: {again:?}");
}

#[tokio::test(start_paused = true)]
async fn failed_revoke_keeps_the_flow_pending() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();
    let _ = controller.login("ada@example.com", PASSWORD).await;
    harness
        .transport
        .fail_next_revoke(AuthError::Server { status: 503 });

    let result = controller
        .resolve_session_limit(Resolution::RevokeSession("session-a".to_string()))
        .await;

    assert!(matches!(result, Err(AuthError::Server { status: 503 })));
    assert_eq!(controller.session_limit_phase(), LimitPhase::AwaitingResolution);
    assert_eq!(harness.transport.login_count(), 1);

    controller
        .resolve_session_limit(Resolution::RevokeSession("session-a".to_string()))
        .await
        .expect("second attempt");
    assert!(controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_the_login() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();
    let _ = controller.login("ada@example.com", PASSWORD).await;

    controller.cancel_session_limit();

    assert_eq!(controller.session_limit_phase(), LimitPhase::Idle);
    assert_eq!(controller.pending_session_limit(), None);
    let result = controller
        .resolve_session_limit(Resolution::RevokeOthers)
        .await;
    assert!(matches!(result, Err(AuthError::NoPendingResolution)));
    assert!(harness.transport.revokes().is_empty());
    assert!(!controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn management_token_is_not_reused_after_resolution() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();
    let _ = controller.login("ada@example.com", PASSWORD).await;
    controller
        .resolve_session_limit(Resolution::RevokeSession("session-c".to_string()))
        .await
        .expect("resolved");

    let again = controller
        .resolve_session_limit(Resolution::RevokeSession("session-a".to_string()))
        .await;

    assert!(matches!(again, Err(AuthError::NoPendingResolution)));
    assert_eq!(harness.transport.revokes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_session_is_rejected_locally() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();
    let _ = controller.login("ada@example.com", PASSWORD).await;

    let result = controller
        .resolve_session_limit(Resolution::RevokeSession("session-z".to_string()))
        .await;

    assert!(matches!(result, Err(AuthError::UnknownSession(id)) if id == "session-z"));
    assert!(harness.transport.revokes().is_empty());
    assert_eq!(controller.session_limit_phase(), LimitPhase::AwaitingResolution);
    assert_eq!(
        controller
            .pending_session_limit()
            .map(|limit| limit.current_active_sessions),
        Some(3)
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failure_after_revoke_keeps_the_login_resumable() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();
    let _ = controller.login("ada@example.com", PASSWORD).await;
    harness.transport.fail_next_login(AuthError::Timeout);

    let first = controller
        .resolve_session_limit(Resolution::RevokeSession("session-a".to_string()))
        .await;

    assert!(matches!(first, Err(AuthError::Timeout)));
    assert_eq!(controller.session_limit_phase(), LimitPhase::Resolved);
    assert!(!controller.is_authenticated());

    let user = controller
        .resolve_session_limit(Resolution::RevokeSession("session-a".to_string()))
        .await
        .expect("retried login");

    assert_eq!(user.id, "user-1");
    assert_eq!(harness.transport.login_count(), 3);
    assert_eq!(harness.transport.revokes().len(), 1);
    assert_eq!(controller.session_limit_phase(), LimitPhase::Idle);
    assert!(controller.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn rejected_login_after_revoke_ends_the_flow() {
    let harness = Harness::new();
    at_capacity(&harness);
    let controller = harness.controller();
    let _ = controller.login("ada@example.com", PASSWORD).await;
    harness
        .transport
        .fail_next_login(AuthError::InvalidCredentials);

    let result = controller
        .resolve_session_limit(Resolution::RevokeOthers)
        .await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert_eq!(controller.session_limit_phase(), LimitPhase::Idle);
    assert!(matches!(
        controller.resolve_session_limit(Resolution::RevokeOthers).await,
        Err(AuthError::NoPendingResolution)
    ));
}
