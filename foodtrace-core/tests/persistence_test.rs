mod common;

use common::{FakeAuthApi, Harness, START_MILLIS, credentials};
use foodtrace_core::error::AppError;
use foodtrace_core::storage::{FileBackend, StorageAdapter};
use foodtrace_core::store::PersistedEnvelope;
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_snapshot_layout() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();
    h.store.flush().await;

    let envelope: PersistedEnvelope = h.storage.get_data("auth-storage").await.unwrap();
    assert_eq!(envelope.version, 1);
    assert!(envelope.timestamp > 0);
    assert_eq!(envelope.state["isAuthenticated"], true);
    assert_eq!(envelope.state["token"], "t1");
    assert_eq!(envelope.state["refreshToken"], "r1");
    assert_eq!(envelope.state["tokenExpiresAt"], START_MILLIS + 3_600_000);
    assert_eq!(envelope.state["permissions"][0]["resource"], "batches");
    assert!(envelope.state.get("loading").is_none());
}

#[tokio::test]
async fn test_restart_restores_valid_session() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();
    let session_id = h.store.state().session_id;

    let restarted = h.restart(START_MILLIS + 60_000).await;
    assert!(restarted.store.is_authenticated());
    assert!(!restarted.store.is_initialized());
    assert_eq!(restarted.sink.token().as_deref(), Some("t1"));

    restarted.store.initialize().await;

    let state = restarted.store.state();
    assert!(state.is_initialized);
    assert!(state.is_authenticated);
    assert_eq!(state.token.as_deref(), Some("t1"));
    assert_eq!(state.session_id, session_id);
    assert_eq!(restarted.api.refreshes(), 0);
    assert_eq!(restarted.api.login_calls.load(Ordering::SeqCst), 1);
    assert_eq!(restarted.api.current_user_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        state.user.unwrap().display_name.as_deref(),
        Some("Inspector A (fresh)")
    );
}

#[tokio::test]
async fn test_restart_refreshes_expired_session_before_ready() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();

    let restarted = h.restart(START_MILLIS + 3_600_000).await;
    assert!(restarted.store.check_token_expiry());

    restarted.store.initialize().await;

    let state = restarted.store.state();
    assert!(state.is_initialized);
    assert!(state.is_authenticated);
    assert_eq!(state.token.as_deref(), Some("t2"));
    assert_eq!(state.token_expires_at, Some(START_MILLIS + 3_600_000 + 3_600_000));
    assert_eq!(restarted.api.refreshes(), 1);
    assert_eq!(restarted.sink.token().as_deref(), Some("t2"));
}

#[tokio::test]
async fn test_initialize_completes_when_refresh_fails() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();
    h.api.fail_refresh(AppError::authentication("refresh token expired"));

    let restarted = h.restart(START_MILLIS + 7_200_000).await;
    restarted.store.initialize().await;

    let state = restarted.store.state();
    assert!(state.is_initialized);
    assert!(!state.is_authenticated);
    assert!(state.token.is_none());
    assert_eq!(restarted.api.current_user_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_profile_fetch_failure_is_not_fatal() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();
    h.api.fail_current_user(AppError::network("offline"));

    let restarted = h.restart(START_MILLIS + 60_000).await;
    restarted.store.initialize().await;

    let state = restarted.store.state();
    assert!(state.is_initialized);
    assert!(state.is_authenticated);
    assert_eq!(state.base.error.as_deref(), Some("offline"));
    assert_eq!(state.user.unwrap().display_name.as_deref(), Some("Inspector A"));
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();

    let restarted = h.restart(START_MILLIS + 3_600_000).await;
    restarted.store.initialize().await;
    restarted.store.initialize().await;
    assert_eq!(restarted.api.refreshes(), 1);
}

#[tokio::test]
async fn test_logout_nulls_persisted_session() {
    let h = Harness::new().await;
    h.store.login(credentials()).await.unwrap();
    h.store.logout().await;
    h.store.flush().await;

    let envelope: PersistedEnvelope = h.storage.get_data("auth-storage").await.unwrap();
    assert_eq!(envelope.state["isAuthenticated"], false);
    assert!(envelope.state["token"].is_null());
    assert!(envelope.state["refreshToken"].is_null());
    assert!(envelope.state["user"].is_null());

    let restarted = h.restart(START_MILLIS).await;
    restarted.store.initialize().await;
    assert!(!restarted.store.is_authenticated());
    assert_eq!(restarted.sink.token(), None);
}

#[tokio::test]
async fn test_session_survives_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageAdapter::new(
        Arc::new(FileBackend::open(dir.path()).await.unwrap()),
        "foodtrace:",
    );

    let h = Harness::with_storage(FakeAuthApi::new(), storage, START_MILLIS).await;
    h.store.login(credentials()).await.unwrap();
    h.store.destroy().await;

    let reopened = StorageAdapter::new(
        Arc::new(FileBackend::open(dir.path()).await.unwrap()),
        "foodtrace:",
    );
    assert_eq!(reopened.get_all_keys().await, vec!["auth-storage".to_string()]);

    let restarted = Harness::with_storage(h.api.clone(), reopened, START_MILLIS + 1_000).await;
    restarted.store.initialize().await;
    assert!(restarted.store.is_authenticated());
    assert_eq!(restarted.store.state().token.as_deref(), Some("t1"));
}
