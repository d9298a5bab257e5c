//! The backend contract the auth store depends on.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use super::types::{
    AuthResponse, ChangePasswordRequest, LoginCredentials, ProfileUpdate, RefreshResponse,
    RegisterRequest, User,
};
use crate::api::{ApiClient, AuthEndpoints, RequestConfig};
use crate::error::AppResult;

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> AppResult<AuthResponse>;

    async fn logout(&self) -> AppResult<()>;

    async fn register(&self, request: &RegisterRequest) -> AppResult<AuthResponse>;

    async fn refresh_token(&self, refresh_token: &str) -> AppResult<RefreshResponse>;

    async fn get_current_user(&self) -> AppResult<User>;

    async fn update_profile(&self, update: &ProfileUpdate) -> AppResult<User>;

    async fn change_password(&self, request: &ChangePasswordRequest) -> AppResult<()>;

    /// Whether `get_current_user` is backed by a real endpoint.
    fn supports_current_user(&self) -> bool {
        true
    }
}

/// Where the store publishes the current access token.
pub trait TokenSink: Send + Sync {
    fn set_token(&self, token: &str);

    fn clear_token(&self);
}

impl TokenSink for ApiClient {
    fn set_token(&self, token: &str) {
        self.set_auth_token(token);
    }

    fn clear_token(&self) {
        self.remove_auth_token();
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

/// [`AuthApi`] over the shared [`ApiClient`].
///
/// Login, registration and refresh are sent without retries so a
/// transport failure reaches the caller once.
pub struct HttpAuthApi {
    client: Arc<ApiClient>,
    endpoints: AuthEndpoints,
}

impl HttpAuthApi {
    pub fn new(client: Arc<ApiClient>, endpoints: AuthEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    #[instrument(skip_all, fields(username = %credentials.username))]
    async fn login(&self, credentials: &LoginCredentials) -> AppResult<AuthResponse> {
        let config = RequestConfig::post(&self.endpoints.login)
            .json(credentials)?
            .retries(0);
        self.client.request(config).await
    }

    #[instrument(skip_all)]
    async fn logout(&self) -> AppResult<()> {
        let config = RequestConfig::post(&self.endpoints.logout).retries(0);
        self.client.request_raw(config).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(username = %request.username))]
    async fn register(&self, request: &RegisterRequest) -> AppResult<AuthResponse> {
        let config = RequestConfig::post(&self.endpoints.register)
            .json(request)?
            .retries(0);
        self.client.request(config).await
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, refresh_token: &str) -> AppResult<RefreshResponse> {
        let config = RequestConfig::post(&self.endpoints.refresh)
            .json(&RefreshBody { refresh_token })?
            .retries(0);
        self.client.request(config).await
    }

    async fn get_current_user(&self) -> AppResult<User> {
        self.client.get(&self.endpoints.current_user).await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> AppResult<User> {
        self.client.patch(&self.endpoints.update_profile, update).await
    }

    async fn change_password(&self, request: &ChangePasswordRequest) -> AppResult<()> {
        let config = RequestConfig::post(&self.endpoints.change_password)
            .json(request)?
            .retries(0);
        self.client.request_raw(config).await?;
        Ok(())
    }
}
