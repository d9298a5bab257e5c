use crate::api::Endpoints;
use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads `configuration.{yaml,toml,json}` (optional) overlaid with
    /// `APP__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry budget per request, not counting the first attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub propagate_trace_context: bool,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            propagate_trace_context: true,
            endpoints: Endpoints::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Pick the best available backend for the current environment.
    #[default]
    Auto,
    Memory,
    File,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackendKind,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub data_dir: Option<PathBuf>,
    pub redis_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Auto,
            prefix: default_prefix(),
            data_dir: None,
            redis_url: None,
        }
    }
}

fn default_prefix() -> String {
    "foodtrace:".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default)]
    pub devtools: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            persist: true,
            devtools: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    #[serde(default = "default_store_name")]
    pub store_name: String,
    /// How long before expiry a token is treated as expired, and how early
    /// the proactive refresh fires.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
    /// Lower bound on the delay of a scheduled refresh.
    #[serde(default = "default_min_refresh_delay_secs")]
    pub min_refresh_delay_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl AuthSettings {
    pub fn refresh_buffer_millis(&self) -> i64 {
        (self.refresh_buffer_secs * 1000) as i64
    }

    pub fn min_refresh_delay_millis(&self) -> i64 {
        (self.min_refresh_delay_secs * 1000) as i64
    }

    pub fn idle_timeout_millis(&self) -> i64 {
        (self.idle_timeout_secs * 1000) as i64
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            store_name: default_store_name(),
            refresh_buffer_secs: default_refresh_buffer_secs(),
            min_refresh_delay_secs: default_min_refresh_delay_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_store_name() -> String {
    "auth-storage".to_string()
}

fn default_refresh_buffer_secs() -> u64 {
    300
}

fn default_min_refresh_delay_secs() -> u64 {
    60
}

fn default_idle_timeout_secs() -> u64 {
    1_800
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_service_name() -> String {
    "foodtrace-client".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_yields_defaults() {
        let settings: Settings = Cfg::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.api.retries, 3);
        assert_eq!(settings.api.timeout(), Duration::from_secs(30));
        assert_eq!(settings.storage.backend, StorageBackendKind::Auto);
        assert_eq!(settings.storage.prefix, "foodtrace:");
        assert!(settings.store.persist);
        assert!(!settings.store.devtools);
        assert_eq!(settings.auth.refresh_buffer_millis(), 300_000);
        assert_eq!(settings.auth.min_refresh_delay_millis(), 60_000);
    }

    #[test]
    fn test_overrides_are_applied() {
        let settings: Settings = Cfg::builder()
            .set_override("api.base_url", "https://trace.example.com/api")
            .unwrap()
            .set_override("api.retries", 5)
            .unwrap()
            .set_override("storage.backend", "memory")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.api.base_url, "https://trace.example.com/api");
        assert_eq!(settings.api.retries, 5);
        assert_eq!(settings.storage.backend, StorageBackendKind::Memory);
    }
}
