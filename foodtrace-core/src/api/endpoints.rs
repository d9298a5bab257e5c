//! Typed endpoint registry.
//!
//! Paths are fields on plain structs so a missing endpoint is a compile
//! error rather than a failed lookup at runtime.

use serde::Deserialize;

/// Authentication endpoints, relative to the client's base URL.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthEndpoints {
    pub login: String,
    pub logout: String,
    pub register: String,
    pub refresh: String,
    pub current_user: String,
    pub update_profile: String,
    pub change_password: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            logout: "/auth/logout".to_string(),
            register: "/auth/register".to_string(),
            refresh: "/auth/refresh".to_string(),
            current_user: "/auth/me".to_string(),
            update_profile: "/auth/profile".to_string(),
            change_password: "/auth/password".to_string(),
        }
    }
}

/// Production batch endpoints. Item paths are built from the collection
/// path so an override of `base` moves every route.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchEndpoints {
    pub base: String,
}

impl Default for BatchEndpoints {
    fn default() -> Self {
        Self {
            base: "/batches".to_string(),
        }
    }
}

impl BatchEndpoints {
    pub fn list(&self) -> String {
        self.base.clone()
    }

    pub fn create(&self) -> String {
        self.base.clone()
    }

    pub fn detail(&self, id: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), id)
    }

    pub fn timeline(&self, id: &str) -> String {
        format!("{}/timeline", self.detail(id))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Endpoints {
    pub auth: AuthEndpoints,
    pub batches: BatchEndpoints,
}
