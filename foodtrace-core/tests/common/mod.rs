//! Shared helpers for foodtrace-core integration tests.
//!
//! `FakeAuthApi` is a scripted in-process backend: it succeeds by default,
//! counts every call and can be told to fail or stall per endpoint.

#![allow(dead_code)]

use async_trait::async_trait;
use foodtrace_core::auth::{
    AuthApi, AuthResponse, AuthStore, AuthStoreConfig, ChangePasswordRequest, LoginCredentials,
    Permission, ProfileUpdate, RefreshResponse, RegisterRequest, TokenSink, User,
};
use foodtrace_core::clock::ManualClock;
use foodtrace_core::error::{AppError, AppResult};
use foodtrace_core::storage::StorageAdapter;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 2023-11-14T22:13:20Z
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("foodtrace_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn sample_user() -> User {
    User {
        id: "u-1".to_string(),
        username: "a".to_string(),
        email: Some("a@example.com".to_string()),
        display_name: Some("Inspector A".to_string()),
        role: "inspector".to_string(),
        permissions: vec![],
        preferences: serde_json::Value::Null,
    }
}

pub fn auth_response(token: &str, refresh_token: &str, expires_in: u64) -> AuthResponse {
    AuthResponse {
        user: sample_user(),
        token: token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_in,
        permissions: Some(vec![Permission::new("batches", "read")]),
        features: Some(vec!["ai_analysis".to_string()]),
    }
}

pub fn credentials() -> LoginCredentials {
    LoginCredentials::new("a", "b")
}

pub struct FakeAuthApi {
    pub login_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub current_user_calls: AtomicUsize,
    login_expires_in: AtomicU64,
    refresh_expires_in: AtomicU64,
    permissions: Mutex<Vec<Permission>>,
    login_error: Mutex<Option<AppError>>,
    register_error: Mutex<Option<AppError>>,
    refresh_error: Mutex<Option<AppError>>,
    logout_error: Mutex<Option<AppError>>,
    current_user_error: Mutex<Option<AppError>>,
    refresh_delay: Mutex<Duration>,
}

impl Default for FakeAuthApi {
    fn default() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            current_user_calls: AtomicUsize::new(0),
            login_expires_in: AtomicU64::new(3600),
            refresh_expires_in: AtomicU64::new(3600),
            permissions: Mutex::new(vec![Permission::new("batches", "read")]),
            login_error: Mutex::new(None),
            register_error: Mutex::new(None),
            refresh_error: Mutex::new(None),
            logout_error: Mutex::new(None),
            current_user_error: Mutex::new(None),
            refresh_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeAuthApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_login_expires_in(&self, secs: u64) {
        self.login_expires_in.store(secs, Ordering::SeqCst);
    }

    pub fn set_refresh_expires_in(&self, secs: u64) {
        self.refresh_expires_in.store(secs, Ordering::SeqCst);
    }

    pub fn set_permissions(&self, permissions: Vec<Permission>) {
        *self.permissions.lock().unwrap() = permissions;
    }

    pub fn fail_login(&self, error: AppError) {
        *self.login_error.lock().unwrap() = Some(error);
    }

    pub fn fail_register(&self, error: AppError) {
        *self.register_error.lock().unwrap() = Some(error);
    }

    pub fn fail_refresh(&self, error: AppError) {
        *self.refresh_error.lock().unwrap() = Some(error);
    }

    pub fn fail_logout(&self, error: AppError) {
        *self.logout_error.lock().unwrap() = Some(error);
    }

    pub fn fail_current_user(&self, error: AppError) {
        *self.current_user_error.lock().unwrap() = Some(error);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn session(&self) -> AuthResponse {
        let mut response = auth_response("t1", "r1", self.login_expires_in.load(Ordering::SeqCst));
        response.permissions = Some(self.permissions.lock().unwrap().clone());
        response
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, _credentials: &LoginCredentials) -> AppResult<AuthResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.login_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.session())
    }

    async fn logout(&self) -> AppResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        match self.logout_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn register(&self, _request: &RegisterRequest) -> AppResult<AuthResponse> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.register_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.session())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> AppResult<RefreshResponse> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.refresh_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(RefreshResponse {
            token: format!("t{}", n + 1),
            refresh_token: Some(format!("r{}", n + 1)),
            expires_in: self.refresh_expires_in.load(Ordering::SeqCst),
        })
    }

    async fn get_current_user(&self) -> AppResult<User> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.current_user_error.lock().unwrap().clone() {
            return Err(error);
        }
        let mut user = sample_user();
        user.display_name = Some("Inspector A (fresh)".to_string());
        Ok(user)
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> AppResult<User> {
        let mut user = sample_user();
        if let Some(name) = &update.display_name {
            user.display_name = Some(name.clone());
        }
        Ok(user)
    }

    async fn change_password(&self, _request: &ChangePasswordRequest) -> AppResult<()> {
        Ok(())
    }
}

/// Remembers the last token the store published.
#[derive(Default)]
pub struct RecordingSink {
    token: Mutex<Option<String>>,
}

impl RecordingSink {
    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

impl TokenSink for RecordingSink {
    fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = Some(token.to_string());
    }

    fn clear_token(&self) {
        *self.token.lock().unwrap() = None;
    }
}

pub struct Harness {
    pub api: Arc<FakeAuthApi>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub storage: StorageAdapter,
    pub store: AuthStore,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_storage(FakeAuthApi::new(), StorageAdapter::memory(), START_MILLIS).await
    }

    pub async fn with_storage(api: Arc<FakeAuthApi>, storage: StorageAdapter, now: i64) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let sink = Arc::new(RecordingSink::default());
        let store = build_store(&api, &storage, &clock, &sink).await;
        Self {
            api,
            clock,
            sink,
            storage,
            store,
        }
    }

    /// A second store over the same storage, as after a process restart.
    pub async fn restart(&self, now: i64) -> Self {
        self.store.destroy().await;
        Self::with_storage(self.api.clone(), self.storage.clone(), now).await
    }
}

pub async fn build_store(
    api: &Arc<FakeAuthApi>,
    storage: &StorageAdapter,
    clock: &Arc<ManualClock>,
    sink: &Arc<RecordingSink>,
) -> AuthStore {
    let auth_api: Arc<dyn AuthApi> = api.clone();
    AuthStore::builder(auth_api)
        .storage(storage.clone())
        .clock(clock.clone())
        .token_sink(sink.clone())
        .config(AuthStoreConfig::default())
        .build()
        .await
}

/// Lets spawned tasks run after a clock change.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
