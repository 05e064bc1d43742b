//! End-to-end session lifecycle tests against a mock backend.
//!
//! These drive the real HTTP pipeline: store, client, auth API, and session
//! manager wired together the way a hosting shell wires them.

use std::time::Duration;

use veranda_session::{AppState, AuthApi, Config, SessionEvent, SessionManager, TokenStore};

async fn stack_for(server: &mockito::Server) -> AppState {
    let config = Config::with_api_url(&server.url());
    AppState::new(
        &config,
        std::sync::Arc::new(veranda_session::MemoryBackend::new()),
    )
    .await
}

async fn mock_refresh_rejected(server: &mut mockito::Server) -> mockito::Mock {
    server
        .mock("POST", "/auth/refresh")
        .with_status(401)
        .with_body(r#""no refresh credential""#)
        .create_async()
        .await
}

#[tokio::test]
async fn user_and_token_stay_coupled_across_the_lifecycle() {
    let mut server = mockito::Server::new_async().await;
    mock_refresh_rejected(&mut server).await;
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(r#"{"access":"tok1","user":{"id":1,"email":"a@b.com"},"tenant":{"id":5,"slug":"acme"}}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/auth/logout")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let state = stack_for(&server).await;
    state.initialize().await;

    // Anonymous: no user, no token
    let snapshot = state.session.snapshot().await;
    assert!(snapshot.user.is_none() && !snapshot.has_token);

    // Signed in: user and token together
    state
        .session
        .login("a@b.com", "pw", None, false)
        .await
        .unwrap();
    let snapshot = state.session.snapshot().await;
    assert!(snapshot.user.is_some() && snapshot.has_token);

    // Signed out: both gone together
    state.session.logout().await;
    let snapshot = state.session.snapshot().await;
    assert!(snapshot.user.is_none() && !snapshot.has_token);
}

#[tokio::test]
async fn me_is_idempotent() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth/me")
        .expect(2)
        .with_status(200)
        .with_body(r#"{"user":{"id":1,"email":"a@b.com"},"tenant":{"id":5,"slug":"acme"}}"#)
        .create_async()
        .await;

    let state = stack_for(&server).await;
    state.store.set_access_token(Some("tok1")).await;

    let first = state.api.me().await.unwrap();
    let second = state.api.me().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn startup_with_a_dead_token_settles_anonymous_without_panicking() {
    // Scenario: cached token is expired, the refresh credential is gone too
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth/me")
        .with_status(401)
        .with_body(r#""token expired""#)
        .create_async()
        .await;
    mock_refresh_rejected(&mut server).await;

    let state = stack_for(&server).await;
    state.store.set_access_token(Some("stale-token")).await;

    state.initialize().await;

    let snapshot = state.session.snapshot().await;
    assert!(snapshot.loaded);
    assert!(snapshot.user.is_none());
    // The server explicitly disowned the session, so the dead token is gone
    assert!(!snapshot.has_token);
}

#[tokio::test]
async fn logout_in_another_tab_signs_this_tab_out() {
    let mut server = mockito::Server::new_async().await;
    mock_refresh_rejected(&mut server).await;
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(r#"{"access":"tok1","user":{"id":1,"email":"a@b.com"},"tenant":null}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/auth/logout")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let state = stack_for(&server).await;
    state.initialize().await;
    state
        .session
        .login("a@b.com", "pw", None, false)
        .await
        .unwrap();

    // A second manager over the same store is another tab
    let other_tab = SessionManager::new(state.api.clone(), &state.store);
    let mut events = state.session.subscribe();

    other_tab.logout().await;

    // This tab hears the storage change and clears itself
    let signed_out = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(SessionEvent::SignedOut) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(signed_out.is_ok(), "expected a SignedOut event");

    let snapshot = state.session.snapshot().await;
    assert!(snapshot.user.is_none());
    assert!(!snapshot.has_token);
}

#[tokio::test]
async fn new_token_in_another_tab_is_adopted_here() {
    let mut server = mockito::Server::new_async().await;
    mock_refresh_rejected(&mut server).await;
    server
        .mock("GET", "/auth/me")
        .with_status(200)
        .with_body(r#"{"user":{"id":2,"email":"other@b.com"},"tenant":{"id":9,"slug":"globex"}}"#)
        .create_async()
        .await;

    let state = stack_for(&server).await;
    state.initialize().await;
    assert!(state.session.snapshot().await.user.is_none());

    // Another tab writes a fresh token into the shared store
    let other_tab_store = state.store.handle();
    other_tab_store.set_access_token(Some("tok2")).await;

    let adopted = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = state.session.snapshot().await;
            if snapshot.user.as_ref().map(|u| u.id) == Some(2) {
                break snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("expected the other tab's identity to be adopted");

    assert_eq!(adopted.tenant.unwrap().slug, "globex");
}

#[tokio::test]
async fn silent_refresh_rejection_does_not_force_a_logout() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(r#"{"access":"tok1","user":{"id":1,"email":"a@b.com"},"tenant":null}"#)
        .create_async()
        .await;
    mock_refresh_rejected(&mut server).await;

    let state = stack_for(&server).await;
    state
        .session
        .login("a@b.com", "pw", None, false)
        .await
        .unwrap();

    // The refresh endpoint rejects, but that alone must not end the session
    let refreshed = state.api.refresh().await.unwrap();
    assert_eq!(refreshed, None);

    let snapshot = state.session.snapshot().await;
    assert!(snapshot.user.is_some());
    assert!(snapshot.has_token);
}

#[tokio::test]
async fn two_factor_management_round_trip() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/2fa/setup")
        .with_status(200)
        .with_body(r#"{"secret":"JBSWY3DP","otpauthUrl":"otpauth://totp/veranda?secret=JBSWY3DP"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/auth/2fa/verify")
        .with_status(200)
        .with_body(r#"{"backupCodes":["1111-2222","3333-4444"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/auth/2fa/status")
        .with_status(200)
        .with_body(r#"{"enabled":true}"#)
        .create_async()
        .await;

    let state = stack_for(&server).await;
    state.store.set_access_token(Some("tok1")).await;

    let setup = state.api.setup_two_factor().await.unwrap();
    assert_eq!(setup.secret, "JBSWY3DP");

    match state.api.verify_two_factor("123456").await.unwrap() {
        veranda_session::api::TwoFactorVerifyOutcome::Verified { backup_codes } => {
            assert_eq!(backup_codes.len(), 2);
        }
        other => panic!("expected Verified, got {other:?}"),
    }

    assert!(state.api.two_factor_status().await.unwrap().enabled);
}

#[tokio::test]
async fn disable_two_factor_with_a_wrong_password_is_rejected_not_an_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth/2fa/disable")
        .with_status(400)
        .with_body(r#"{"error":"password does not match"}"#)
        .create_async()
        .await;

    let state = stack_for(&server).await;
    state.store.set_access_token(Some("tok1")).await;

    match state.api.disable_two_factor("wrong").await.unwrap() {
        veranda_session::api::TwoFactorDisableOutcome::Rejected { message } => {
            assert!(message.contains("password does not match"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn refresh_transport_failure_is_an_error_not_a_rejection() {
    let config = Config::with_api_url("http://127.0.0.1:1");
    let store = TokenStore::in_memory().await;
    let api = AuthApi::new(veranda_session::ApiClient::new(&config, store));

    let result = api.refresh().await;
    assert!(result.is_err());
    assert!(result.unwrap_err().is_transport());
}
