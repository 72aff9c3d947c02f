use std::sync::atomic::Ordering;
use std::time::Duration;

use gatehouse::dispatcher::DispatchOutcome;
use gatehouse::primitives::{Screen, SessionChangeEvent};
use gatehouse::reconciler::AuthState;
use gatehouse::AuthError;

mod common;
use common::{build_flow, session, wait_for_state, InMemoryProfiles, InMemoryProvider, Router};

#[tokio::test]
async fn test_cold_start_with_persisted_session_and_profile() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(Some(session("user-1", "p-access", "p-refresh")));
    let profiles = InMemoryProfiles::new(&["user-1"]);
    let router = Router::new();
    let flow = build_flow(&provider, &profiles, &router);

    let outcome = flow.start(None).await?;
    assert_eq!(outcome, DispatchOutcome::Ignored);

    wait_for_state(&flow, AuthState::AuthenticatedComplete).await;
    assert_eq!(router.screens(), vec![(Screen::Home, true)]);
    Ok(())
}

#[tokio::test]
async fn test_live_callback_without_profile_lands_on_profile_setup() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    provider.register_link_tokens("AAA", "BBB", "user-2");
    let profiles = InMemoryProfiles::new(&[]);
    let router = Router::new();
    let flow = build_flow(&provider, &profiles, &router);
    flow.start(None).await?;
    wait_for_state(&flow, AuthState::Unauthenticated).await;

    let outcome = flow
        .handle_url("app://auth/callback#access_token=AAA&refresh_token=BBB".to_string())
        .await?;

    assert_eq!(outcome, DispatchOutcome::SessionEstablished);
    wait_for_state(&flow, AuthState::ProfileSetupRequired).await;
    assert_eq!(
        router.screens(),
        vec![(Screen::Auth, true), (Screen::ProfileSetup, true)]
    );
    assert_eq!(
        flow.current_session().map(|s| s.user_id),
        Some("user-2".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_reset_link_missing_refresh_token() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    let router = Router::new();
    let flow = build_flow(&provider, &InMemoryProfiles::new(&[]), &router);
    flow.start(None).await?;
    wait_for_state(&flow, AuthState::Unauthenticated).await;

    let result = flow
        .handle_url("app://reset-password?access_token=AAA".to_string())
        .await;

    assert!(matches!(result, Err(AuthError::MissingToken { .. })));
    assert_eq!(flow.state(), AuthState::Unauthenticated);
    assert_eq!(flow.current_session(), None);
    assert_eq!(router.screens(), vec![(Screen::Auth, true)]);
    Ok(())
}

#[tokio::test]
async fn test_reset_link_from_route_and_live_event_is_processed_once() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    let router = Router::new();
    let flow = build_flow(&provider, &InMemoryProfiles::new(&[]), &router);
    flow.start(None).await?;

    let link = "app://reset-password#access_token=AAA&refresh_token=BBB&type=recovery";
    let from_route = flow.handle_route_url(link.to_string()).await?;
    let from_event = flow.handle_url(link.to_string()).await?;

    assert_eq!(from_route, DispatchOutcome::ResetStaged);
    assert_eq!(from_event, DispatchOutcome::Duplicate);
    assert_eq!(flow.state(), AuthState::ResetPasswordPending);
    let pushes = router
        .screens()
        .into_iter()
        .filter(|(screen, _)| *screen == Screen::ResetPassword)
        .count();
    assert_eq!(pushes, 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_link_is_ignored() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    let router = Router::new();
    let flow = build_flow(&provider, &InMemoryProfiles::new(&[]), &router);
    flow.start(None).await?;
    wait_for_state(&flow, AuthState::Unauthenticated).await;

    let outcome = flow.handle_url("app://unknown/path".to_string()).await?;

    assert_eq!(outcome, DispatchOutcome::Ignored);
    assert_eq!(flow.state(), AuthState::Unauthenticated);
    assert_eq!(router.screens(), vec![(Screen::Auth, true)]);
    Ok(())
}

#[tokio::test]
async fn test_cold_start_callback_link() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    provider.register_link_tokens("AAA", "BBB", "user-3");
    let profiles = InMemoryProfiles::new(&["user-3"]);
    let router = Router::new();
    let flow = build_flow(&provider, &profiles, &router);

    let outcome = flow
        .start(Some(
            "app://auth/callback?access_token=AAA#refresh_token=BBB".to_string(),
        ))
        .await?;

    assert_eq!(outcome, DispatchOutcome::SessionEstablished);
    wait_for_state(&flow, AuthState::AuthenticatedComplete).await;
    assert_eq!(router.screens().last(), Some(&(Screen::Home, true)));
    Ok(())
}

#[tokio::test]
async fn test_password_reset_round_trip() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    provider.register_link_tokens("RA", "RB", "user-4");
    let profiles = InMemoryProfiles::new(&["user-4"]);
    let router = Router::new();
    let flow = build_flow(&provider, &profiles, &router);
    flow.start(None).await?;

    flow.handle_url("app://reset-password#access_token=RA&refresh_token=RB".to_string())
        .await?;
    assert!(flow.staged_reset_available());

    // the reset screen must not be replaced while the user types
    provider.emit(SessionChangeEvent::TokenRefreshed, None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(flow.state(), AuthState::ResetPasswordPending);

    flow.complete_password_reset("n3w-passw0rd".to_string())
        .await?;

    assert!(!flow.staged_reset_available());
    assert_eq!(*provider.passwords.lock().unwrap(), vec!["n3w-passw0rd"]);
    wait_for_state(&flow, AuthState::AuthenticatedComplete).await;
    assert_eq!(router.screens().last(), Some(&(Screen::Home, true)));
    Ok(())
}

#[tokio::test]
async fn test_same_callback_with_different_encodings_exchanges_once() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(None);
    provider.register_link_tokens("AAA", "BBB", "user-5");
    let router = Router::new();
    let flow = build_flow(&provider, &InMemoryProfiles::new(&["user-5"]), &router);
    flow.start(None).await?;

    flow.handle_url("app://auth/callback#access_token=AAA&refresh_token=BBB".to_string())
        .await?;
    let second = flow
        .handle_url("app://auth/callback?access_token=AAA&refresh_token=BBB".to_string())
        .await?;

    assert_eq!(second, DispatchOutcome::SessionEstablished);
    assert_eq!(provider.set_session_calls.load(Ordering::SeqCst), 1);
    wait_for_state(&flow, AuthState::AuthenticatedComplete).await;
    Ok(())
}

#[tokio::test]
async fn test_remote_sign_out_returns_to_auth() -> anyhow::Result<()> {
    let provider = InMemoryProvider::new(Some(session("user-6", "a", "b")));
    let router = Router::new();
    let flow = build_flow(&provider, &InMemoryProfiles::new(&["user-6"]), &router);
    flow.start(None).await?;
    wait_for_state(&flow, AuthState::AuthenticatedComplete).await;

    provider.emit(SessionChangeEvent::SignedOut, None);

    wait_for_state(&flow, AuthState::Unauthenticated).await;
    assert_eq!(
        router.screens(),
        vec![(Screen::Home, true), (Screen::Auth, true)]
    );
    flow.stop();
    assert_eq!(provider.listener_count(), 0);
    Ok(())
}
