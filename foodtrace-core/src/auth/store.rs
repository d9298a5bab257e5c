//! Authenticated-session state machine.
//!
//! `Unauthenticated -> Authenticating -> Authenticated <-> Refreshing`, with
//! logout or a failed refresh returning to `Unauthenticated`. Every session
//! change bumps an epoch; timers and in-flight refreshes started under an
//! older epoch discard their effect.

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use super::api::{AuthApi, TokenSink};
use super::types::{
    AuthResponse, AuthState, AuthStatus, ChangePasswordRequest, LoginCredentials, ProfileUpdate,
    RegisterRequest, User, lifetime_millis,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthSettings, StoreSettings};
use crate::error::{AppError, AppResult};
use crate::storage::StorageAdapter;
use crate::store::{AsyncOperationOptions, BaseStore};

#[derive(Debug, Clone)]
pub struct AuthStoreConfig {
    /// Storage key of the persisted snapshot.
    pub store_name: String,
    pub refresh_buffer_millis: i64,
    pub min_refresh_delay_millis: i64,
    pub idle_timeout_millis: i64,
    pub persist: bool,
    pub devtools: bool,
}

impl AuthStoreConfig {
    pub fn from_settings(auth: &AuthSettings, store: &StoreSettings) -> Self {
        Self {
            store_name: auth.store_name.clone(),
            refresh_buffer_millis: auth.refresh_buffer_millis(),
            min_refresh_delay_millis: auth.min_refresh_delay_millis(),
            idle_timeout_millis: auth.idle_timeout_millis(),
            persist: store.persist,
            devtools: store.devtools,
        }
    }
}

impl Default for AuthStoreConfig {
    fn default() -> Self {
        Self::from_settings(&AuthSettings::default(), &StoreSettings::default())
    }
}

/// Delay before the proactive refresh of a token living `lifetime` millis.
pub fn refresh_delay_millis(lifetime: i64, buffer_millis: i64, floor_millis: i64) -> i64 {
    lifetime.saturating_sub(buffer_millis).max(floor_millis)
}

/// Upper bound for one timer sleep; a longer-lived token is re-checked then.
const MAX_TIMER_DELAY_MILLIS: i64 = 365 * 24 * 60 * 60 * 1000;

type SharedRefresh = Shared<BoxFuture<'static, AppResult<()>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct AuthStoreBuilder {
    api: Arc<dyn AuthApi>,
    storage: StorageAdapter,
    tokens: Option<Arc<dyn TokenSink>>,
    clock: Arc<dyn Clock>,
    config: AuthStoreConfig,
}

impl AuthStoreBuilder {
    pub fn storage(mut self, storage: StorageAdapter) -> Self {
        self.storage = storage;
        self
    }

    pub fn token_sink(mut self, tokens: Arc<dyn TokenSink>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: AuthStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Hydrates the persisted session, if any. Must run inside a Tokio
    /// runtime.
    pub async fn build(self) -> AuthStore {
        let store = BaseStore::builder(self.config.store_name.clone(), AuthState::default())
            .with_devtools(self.config.devtools)
            .with_persistence(&self.storage, self.config.persist)
            .build()
            .await;

        let auth = AuthStore {
            inner: Arc::new(Inner {
                store,
                api: self.api,
                tokens: self.tokens,
                clock: self.clock,
                config: self.config,
                epoch: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                timer: Mutex::new(None),
                refresh_in_flight: Mutex::new(None),
                session_guard: Mutex::new(()),
            }),
        };

        if let Some(token) = auth.inner.store.with_state(|s| {
            s.is_authenticated.then(|| s.token.clone()).flatten()
        }) {
            debug!("Restored persisted session");
            auth.publish_token(Some(&token));
        }
        auth
    }
}

struct Inner {
    store: BaseStore<AuthState>,
    api: Arc<dyn AuthApi>,
    tokens: Option<Arc<dyn TokenSink>>,
    clock: Arc<dyn Clock>,
    config: AuthStoreConfig,
    epoch: AtomicU64,
    initialized: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
    /// Held while a session change is written to state and to the token
    /// sink, so an epoch check and its commit cannot be split.
    session_guard: Mutex<()>,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct AuthStore {
    inner: Arc<Inner>,
}

impl AuthStore {
    pub fn builder(api: Arc<dyn AuthApi>) -> AuthStoreBuilder {
        AuthStoreBuilder {
            api,
            storage: StorageAdapter::memory(),
            tokens: None,
            clock: Arc::new(SystemClock),
            config: AuthStoreConfig::default(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.inner.store.get_state()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.store.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.store.with_state(|s| s.is_authenticated)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.store.with_state(|s| s.is_initialized)
    }

    pub fn status(&self) -> AuthStatus {
        self.inner.store.with_state(|s| s.status)
    }

    pub fn config(&self) -> &AuthStoreConfig {
        &self.inner.config
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Starts a new session epoch and cancels the pending refresh timer.
    fn end_epoch(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn publish_token(&self, token: Option<&str>) {
        if let Some(sink) = &self.inner.tokens {
            match token {
                Some(token) => sink.set_token(token),
                None => sink.clear_token(),
            }
        }
    }

    /// Back to `Authenticated` if a session survives, `Unauthenticated`
    /// otherwise.
    fn settle_status(&self, action: &str) {
        self.inner.store.set_state(action, |s| {
            s.status = if s.is_authenticated {
                AuthStatus::Authenticated
            } else {
                AuthStatus::Unauthenticated
            };
        });
    }

    fn install_session(&self, action: &str, response: AuthResponse) {
        self.end_epoch();
        let now = self.now();
        let idle_timeout = self.inner.config.idle_timeout_millis;
        let lifetime = lifetime_millis(response.expires_in);
        let token = response.token.clone();

        {
            let _guard = lock(&self.inner.session_guard);
            self.inner.store.set_state(action, |s| {
                s.apply_auth_response(response, now);
                s.session_expires_at = Some(now.saturating_add(idle_timeout));
                s.base.error = None;
                s.base.last_updated = Some(Utc::now());
            });
            self.publish_token(Some(&token));
            self.schedule_refresh(lifetime);
        }
    }

    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: LoginCredentials) -> AppResult<User> {
        self.inner
            .store
            .set_state("login_start", |s| s.status = AuthStatus::Authenticating);

        let result = self
            .inner
            .store
            .track_operation("login", async {
                credentials.validate()?;
                self.inner.api.login(&credentials).await
            })
            .await;

        match result {
            Ok(response) => {
                let user = response.user.clone();
                self.install_session("login_success", response);
                info!(user_id = %user.id, "Logged in");
                Ok(user)
            }
            Err(e) => {
                self.settle_status("login_failure");
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn register(&self, request: RegisterRequest) -> AppResult<User> {
        self.inner
            .store
            .set_state("register_start", |s| s.status = AuthStatus::Authenticating);

        let result = self
            .inner
            .store
            .track_operation("register", async {
                request.validate()?;
                self.inner.api.register(&request).await
            })
            .await;

        match result {
            Ok(response) => {
                let user = response.user.clone();
                self.install_session("register_success", response);
                info!(user_id = %user.id, "Registered");
                Ok(user)
            }
            Err(e) => {
                self.settle_status("register_failure");
                Err(e)
            }
        }
    }

    /// Ends the session locally even when the server call fails.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        self.end_epoch();

        let had_token = self.inner.store.with_state(|s| s.token.is_some());
        if had_token && let Err(e) = self.inner.api.logout().await {
            warn!(
                error_type = %e.error_type,
                error = %e.message,
                "Server logout failed, clearing session anyway"
            );
        }

        self.clear_local_session("logout");
        info!("Logged out");
    }

    fn clear_local_session(&self, action: &str) {
        let _guard = lock(&self.inner.session_guard);
        self.inner.store.set_state(action, |s| {
            s.clear_session();
            s.base.loading = false;
            s.base.last_updated = Some(Utc::now());
        });
        self.publish_token(None);
    }

    /// Rotates the access token. Concurrent callers share one request.
    ///
    /// A failed refresh ends the session.
    pub async fn refresh_access_token(&self) -> AppResult<()> {
        let refresh = {
            let mut slot = lock(&self.inner.refresh_in_flight);
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let store = self.clone();
                    let task = tokio::spawn(async move { store.run_refresh().await });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(AppError::unknown(format!("Token refresh task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        refresh.await
    }

    async fn run_refresh(&self) -> AppResult<()> {
        let outcome = self.refresh_once().await;
        lock(&self.inner.refresh_in_flight).take();
        outcome
    }

    async fn refresh_once(&self) -> AppResult<()> {
        let epoch = self.epoch();
        let Some(refresh_token) = self.inner.store.with_state(|s| s.refresh_token.clone()) else {
            let error = AppError::authentication("No refresh token available")
                .with_code("NO_REFRESH_TOKEN");
            if self.is_authenticated() {
                self.logout().await;
            }
            return Err(error);
        };

        {
            let _guard = lock(&self.inner.session_guard);
            if self.epoch() != epoch {
                return Err(self.discard_refresh());
            }
            self.inner
                .store
                .set_state("refresh_start", |s| s.status = AuthStatus::Refreshing);
        }

        let result = self
            .inner
            .store
            .track_operation(
                "refresh_access_token",
                self.inner.api.refresh_token(&refresh_token),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(_) if self.epoch() != epoch => return Err(self.discard_refresh()),
            Err(e) => {
                counter!("auth_store_refresh_total", "outcome" => "failure").increment(1);
                warn!(
                    error_type = %e.error_type,
                    error = %e.message,
                    "Token refresh failed, ending session"
                );
                self.logout().await;
                return Err(e);
            }
        };

        let now = self.now();
        let lifetime = lifetime_millis(response.expires_in);
        let token = response.token.clone();
        let committed = {
            let _guard = lock(&self.inner.session_guard);
            let current = self.epoch() == epoch;
            if current {
                self.inner.store.set_state("refresh_success", |s| {
                    s.apply_refresh(response, now);
                    s.base.last_updated = Some(Utc::now());
                });
                self.publish_token(Some(&token));
                self.schedule_refresh(lifetime);
            }
            current
        };
        if !committed {
            return Err(self.discard_refresh());
        }

        counter!("auth_store_refresh_total", "outcome" => "success").increment(1);
        debug!("Access token refreshed");
        Ok(())
    }

    fn discard_refresh(&self) -> AppError {
        debug!("Session changed during token refresh, discarding result");
        counter!("auth_store_refresh_total", "outcome" => "discarded").increment(1);
        AppError::authentication("Session ended during token refresh").with_code("SESSION_CHANGED")
    }

    /// Arms the one-shot refresh timer for a token living `lifetime` millis.
    fn schedule_refresh(&self, lifetime: i64) {
        let config = &self.inner.config;
        let delay = refresh_delay_millis(
            lifetime,
            config.refresh_buffer_millis,
            config.min_refresh_delay_millis,
        );
        let epoch = self.epoch();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let sleep_millis = delay.clamp(0, MAX_TIMER_DELAY_MILLIS) as u64;
        let deadline = Instant::now() + Duration::from_millis(sleep_millis);

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = AuthStore { inner };
            if store.epoch() != epoch || !store.is_authenticated() {
                debug!("Refresh timer fired for an ended session, skipping");
                return;
            }
            if let Err(e) = store.refresh_access_token().await {
                warn!(error = %e.message, "Scheduled token refresh failed");
            }
        });

        debug!(delay_ms = delay, "Token refresh scheduled");
        if let Some(previous) = lock(&self.inner.timer).replace(timer) {
            previous.abort();
        }
    }

    /// True when the token is missing or expires within the refresh buffer.
    pub fn check_token_expiry(&self) -> bool {
        let buffer = self.inner.config.refresh_buffer_millis;
        let now = self.now();
        self.inner.store.with_state(|s| match s.token_expires_at {
            None => true,
            Some(expires_at) => now >= expires_at.saturating_sub(buffer),
        })
    }

    /// Validates the restored session once per store.
    ///
    /// Always marks the store initialized, whatever happens on the way.
    #[instrument(skip_all)]
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let (has_session, expires_at) = self
            .inner
            .store
            .with_state(|s| (s.is_authenticated || s.refresh_token.is_some(), s.token_expires_at));

        if has_session {
            if self.check_token_expiry() {
                if let Err(e) = self.refresh_access_token().await {
                    warn!(error = %e.message, "Restored session could not be refreshed");
                }
            } else if let Some(expires_at) = expires_at {
                self.schedule_refresh(expires_at.saturating_sub(self.now()));
            }

            if self.is_authenticated() && self.inner.api.supports_current_user() {
                self.fetch_current_user().await;
            }
        }

        self.inner
            .store
            .set_state("initialized", |s| s.is_initialized = true);
        info!(authenticated = self.is_authenticated(), "Auth store initialized");
    }

    /// Reloads the profile. Failures are recorded and logged only.
    pub async fn fetch_current_user(&self) -> Option<User> {
        if !self.is_authenticated() {
            return None;
        }
        let epoch = self.epoch();
        let user = self
            .inner
            .store
            .handle_async_operation(
                self.inner.api.get_current_user(),
                AsyncOperationOptions::context("fetch_current_user"),
            )
            .await?;

        if self.epoch() == epoch {
            let fresh = user.clone();
            self.inner
                .store
                .set_state("current_user_loaded", |s| s.user = Some(fresh));
        }
        Some(user)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> AppResult<User> {
        self.require_session()?;
        let user = self
            .inner
            .store
            .track_operation("update_profile", async {
                update.validate()?;
                self.inner.api.update_profile(&update).await
            })
            .await?;

        let fresh = user.clone();
        self.inner
            .store
            .set_state("profile_updated", |s| s.user = Some(fresh));
        Ok(user)
    }

    pub async fn change_password(&self, request: ChangePasswordRequest) -> AppResult<()> {
        self.require_session()?;
        self.inner
            .store
            .track_operation("change_password", async {
                request.validate()?;
                self.inner.api.change_password(&request).await
            })
            .await
    }

    fn require_session(&self) -> AppResult<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(AppError::authentication("Not signed in").with_code("NOT_AUTHENTICATED"))
        }
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.inner
            .store
            .with_state(|s| s.has_permission(resource, action))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.inner.store.with_state(|s| s.has_role(role))
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.inner.store.with_state(|s| s.has_feature(feature))
    }

    /// Pushes the idle deadline out by the idle timeout. Returns false when
    /// there is no session to extend.
    pub fn extend_session(&self) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        let deadline = self.now().saturating_add(self.inner.config.idle_timeout_millis);
        self.inner
            .store
            .set_state("extend_session", |s| s.session_expires_at = Some(deadline));
        true
    }

    /// Ends the session on this client without contacting the server.
    pub fn invalidate_session(&self) {
        self.end_epoch();
        self.clear_local_session("invalidate_session");
        info!("Session invalidated");
    }

    pub fn is_session_idle_expired(&self) -> bool {
        let now = self.now();
        self.inner.store.with_state(|s| {
            s.is_authenticated && s.session_expires_at.is_some_and(|deadline| now >= deadline)
        })
    }

    /// Waits for queued snapshot writes.
    pub async fn flush(&self) {
        self.inner.store.flush().await;
    }

    /// Stops the refresh timer and flushes storage. The session itself is
    /// left in place for the next process.
    pub async fn destroy(&self) {
        self.end_epoch();
        self.flush().await;
        debug!("Auth store destroyed");
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_delay_has_floor() {
        assert_eq!(refresh_delay_millis(3_600_000, 300_000, 60_000), 3_300_000);
        assert_eq!(refresh_delay_millis(120_000, 300_000, 60_000), 60_000);
        assert_eq!(refresh_delay_millis(360_000, 300_000, 60_000), 60_000);
        assert_eq!(refresh_delay_millis(361_000, 300_000, 60_000), 61_000);
    }

    #[test]
    fn test_config_from_settings() {
        let config = AuthStoreConfig::default();
        assert_eq!(config.store_name, "auth-storage");
        assert_eq!(config.refresh_buffer_millis, 300_000);
        assert_eq!(config.min_refresh_delay_millis, 60_000);
        assert_eq!(config.idle_timeout_millis, 1_800_000);
        assert!(config.persist);
    }
}
