use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use validator::Validate;

use crate::store::{BaseState, Persisted, StoreState};

/// Action that grants every action on its resource.
pub const MANAGE_ACTION: &str = "manage";

/// Resource whose `manage` permission grants everything.
pub const ADMIN_RESOURCE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Whether holding this permission allows `action` on `resource`.
    pub fn grants(&self, resource: &str, action: &str) -> bool {
        if self.resource == ADMIN_RESOURCE && self.action == MANAGE_ACTION {
            return true;
        }
        self.resource == resource && (self.action == action || self.action == MANAGE_ACTION)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub preferences: Value,
}

#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginCredentials {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 3, message = "Username must be at least 3 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Value>,
}

#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePasswordRequest").finish_non_exhaustive()
    }
}

/// Successful login or registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    #[serde(default)]
    pub permissions: Option<Vec<Permission>>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    /// Present when the server rotates the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

/// Session state owned by the auth store.
///
/// `is_authenticated` holds exactly when a token and its expiry are both
/// set, and a user is always present while it holds.
#[derive(Clone, Default, PartialEq)]
pub struct AuthState {
    pub base: BaseState,
    pub status: AuthStatus,
    pub is_authenticated: bool,
    pub is_initialized: bool,
    pub user: Option<User>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    /// Epoch millis.
    pub token_expires_at: Option<i64>,
    pub permissions: Vec<Permission>,
    pub features: Vec<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    /// Idle deadline in epoch millis, moved by `extend_session`.
    pub session_expires_at: Option<i64>,
}

impl AuthState {
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.is_authenticated && self.permissions.iter().any(|p| p.grants(resource, action))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.is_authenticated && self.user.as_ref().is_some_and(|u| u.role == role)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.is_authenticated && self.features.iter().any(|f| f == feature)
    }

    /// Installs a fresh session from a login or registration response.
    pub(crate) fn apply_auth_response(&mut self, response: AuthResponse, now_millis: i64) {
        let permissions = response
            .permissions
            .unwrap_or_else(|| response.user.permissions.clone());

        self.status = AuthStatus::Authenticated;
        self.is_authenticated = true;
        self.token = Some(response.token);
        self.refresh_token = Some(response.refresh_token);
        let lifetime = lifetime_millis(response.expires_in);
        self.token_expires_at = Some(now_millis.saturating_add(lifetime));
        self.permissions = permissions;
        self.features = response.features.unwrap_or_default();
        self.user = Some(response.user);
        self.device_id = Some(uuid::Uuid::new_v4().to_string());
        self.session_id = Some(uuid::Uuid::new_v4().to_string());
    }

    pub(crate) fn apply_refresh(&mut self, response: RefreshResponse, now_millis: i64) {
        self.status = AuthStatus::Authenticated;
        self.token = Some(response.token);
        let lifetime = lifetime_millis(response.expires_in);
        self.token_expires_at = Some(now_millis.saturating_add(lifetime));
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
    }

    /// Drops every session field. The device id outlives the session.
    pub(crate) fn clear_session(&mut self) {
        self.status = AuthStatus::Unauthenticated;
        self.is_authenticated = false;
        self.user = None;
        self.token = None;
        self.refresh_token = None;
        self.token_expires_at = None;
        self.permissions.clear();
        self.features.clear();
        self.session_id = None;
        self.session_expires_at = None;
    }
}

/// Token lifetime in millis for an `expiresIn` given in seconds, saturating
/// instead of overflowing on absurd server values.
pub fn lifetime_millis(expires_in_secs: u64) -> i64 {
    i64::try_from(expires_in_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000)
}

impl StoreState for AuthState {
    fn base(&self) -> &BaseState {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseState {
        &mut self.base
    }
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() { "[REDACTED]" } else { "None" }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("base", &self.base)
            .field("status", &self.status)
            .field("is_authenticated", &self.is_authenticated)
            .field("is_initialized", &self.is_initialized)
            .field("user", &self.user.as_ref().map(|u| &u.username))
            .field("token", &redact(&self.token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_expires_at", &self.token_expires_at)
            .field("permissions", &self.permissions.len())
            .field("features", &self.features)
            .field("session_id", &self.session_id)
            .field("session_expires_at", &self.session_expires_at)
            .finish()
    }
}

/// The persisted projection of [`AuthState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub is_authenticated: bool,
    pub user: Option<User>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub features: Vec<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
}

impl Persisted for AuthState {
    type Snapshot = AuthSnapshot;
    const VERSION: u32 = 1;

    fn partialize(&self) -> AuthSnapshot {
        AuthSnapshot {
            is_authenticated: self.is_authenticated,
            user: self.user.clone(),
            token: self.token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_expires_at: self.token_expires_at,
            permissions: self.permissions.clone(),
            features: self.features.clone(),
            device_id: self.device_id.clone(),
            session_id: self.session_id.clone(),
        }
    }

    fn merge(&mut self, snapshot: AuthSnapshot) {
        let complete = snapshot.is_authenticated
            && snapshot.token.is_some()
            && snapshot.token_expires_at.is_some()
            && snapshot.user.is_some();

        self.device_id = snapshot.device_id;
        if !complete {
            return;
        }

        self.status = AuthStatus::Authenticated;
        self.is_authenticated = true;
        self.user = snapshot.user;
        self.token = snapshot.token;
        self.refresh_token = snapshot.refresh_token;
        self.token_expires_at = snapshot.token_expires_at;
        self.permissions = snapshot.permissions;
        self.features = snapshot.features;
        self.session_id = snapshot.session_id;
    }
}
