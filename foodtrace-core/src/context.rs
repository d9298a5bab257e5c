//! Process-wide wiring of storage, HTTP client and session.
//!
//! There is no global instance: callers create a context at startup, pass
//! it (or its parts) where needed and destroy it on shutdown. Several
//! contexts can coexist, which keeps tests isolated.

use std::sync::Arc;
use tracing::info;

use crate::api::ApiClient;
use crate::auth::{AuthApi, AuthStore, AuthStoreConfig, HttpAuthApi, TokenSink};
use crate::config::Settings;
use crate::error::AppResult;
use crate::storage::{StorageAdapter, create_storage_adapter};

pub struct AppContext {
    settings: Settings,
    storage: StorageAdapter,
    api: Arc<ApiClient>,
    auth: AuthStore,
}

impl AppContext {
    /// Builds every component from `settings`. Without an explicit
    /// `auth_api` the session talks to the configured auth endpoints.
    pub async fn create(settings: Settings, auth_api: Option<Arc<dyn AuthApi>>) -> AppResult<Self> {
        let storage = create_storage_adapter(&settings.storage, None).await;
        let api = Arc::new(ApiClient::from_settings(&settings.api)?);

        let auth_api: Arc<dyn AuthApi> = match auth_api {
            Some(auth_api) => auth_api,
            None => Arc::new(HttpAuthApi::new(
                api.clone(),
                settings.api.endpoints.auth.clone(),
            )),
        };
        let tokens: Arc<dyn TokenSink> = api.clone();
        let auth = AuthStore::builder(auth_api)
            .storage(storage.clone())
            .token_sink(tokens)
            .config(AuthStoreConfig::from_settings(&settings.auth, &settings.store))
            .build()
            .await;

        info!(
            base_url = %settings.api.base_url,
            storage = storage.backend_name(),
            "Application context created"
        );

        Ok(Self {
            settings,
            storage,
            api,
            auth,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> &StorageAdapter {
        &self.storage
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    /// Cancels background work and flushes pending writes.
    pub async fn destroy(self) {
        self.auth.destroy().await;
        info!("Application context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageBackendKind;

    #[tokio::test]
    async fn test_contexts_are_independent() {
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackendKind::Memory;

        let first = AppContext::create(settings.clone(), None).await.unwrap();
        let second = AppContext::create(settings, None).await.unwrap();

        first.api().set_auth_token("t1");
        assert_eq!(first.api().auth_token().as_deref(), Some("t1"));
        assert_eq!(second.api().auth_token(), None);
        assert_eq!(first.storage().backend_name(), "memory");
        assert!(!first.auth().is_authenticated());

        first.destroy().await;
        second.destroy().await;
    }
}
