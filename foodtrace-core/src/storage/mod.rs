//! Pluggable key/value persistence.
//!
//! A [`StorageBackend`] is a physical store that may fail. [`StorageAdapter`]
//! is the contract stores program against: it prefixes keys, adds JSON
//! helpers and never lets a backend failure escape. Failures are reported to
//! the adapter's error callback and degrade to `None` reads and dropped
//! writes.

pub mod factory;
pub mod file;
pub mod memory;
pub mod redis_backend;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use factory::{create_storage_adapter, select_backend};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Raw physical storage. Keys passed in are already prefixed.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// All physical keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Receives every swallowed backend failure with the operation name.
pub type StorageErrorCallback = Arc<dyn Fn(&StorageError, &str) + Send + Sync>;

fn log_storage_error() -> StorageErrorCallback {
    Arc::new(|error: &StorageError, operation: &str| {
        warn!(operation, error = %error, "Storage operation failed");
    })
}

#[derive(Clone)]
pub struct StorageAdapter {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
    on_error: StorageErrorCallback,
}

impl StorageAdapter {
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            on_error: log_storage_error(),
        }
    }

    /// In-memory adapter with no prefix.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), "")
    }

    pub fn with_error_handler(mut self, on_error: StorageErrorCallback) -> Self {
        self.on_error = on_error;
        self
    }

    /// A second adapter over the same backend, scoped to another prefix.
    pub fn scoped(&self, prefix: impl Into<String>) -> Self {
        Self {
            backend: self.backend.clone(),
            prefix: prefix.into(),
            on_error: self.on_error.clone(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn report(&self, error: &StorageError, operation: &str) {
        (self.on_error)(error, operation);
    }

    pub async fn get_item(&self, key: &str) -> Option<String> {
        match self.backend.get(&self.full_key(key)).await {
            Ok(value) => value,
            Err(e) => {
                self.report(&e, "get_item");
                None
            }
        }
    }

    pub async fn set_item(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.set(&self.full_key(key), value).await {
            self.report(&e, "set_item");
        }
    }

    pub async fn remove_item(&self, key: &str) {
        if let Err(e) = self.backend.remove(&self.full_key(key)).await {
            self.report(&e, "remove_item");
        }
    }

    /// Removes only the keys under this adapter's prefix.
    pub async fn clear(&self) {
        let keys = match self.backend.keys(&self.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                self.report(&e, "clear");
                return;
            }
        };
        for key in keys {
            if let Err(e) = self.backend.remove(&key).await {
                self.report(&e, "clear");
            }
        }
    }

    /// Keys under this adapter's prefix, with the prefix stripped.
    pub async fn get_all_keys(&self) -> Vec<String> {
        match self.backend.keys(&self.prefix).await {
            Ok(keys) => {
                let mut keys: Vec<String> = keys
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                    .collect();
                keys.sort();
                keys
            }
            Err(e) => {
                self.report(&e, "get_all_keys");
                Vec::new()
            }
        }
    }

    /// Reads and decodes a JSON value. Undecodable data reads as `None`.
    pub async fn get_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_item(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(&StorageError::from(e), "get_data");
                None
            }
        }
    }

    pub async fn set_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_item(key, &raw).await,
            Err(e) => self.report(&StorageError::from(e), "set_data"),
        }
    }
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("backend", &self.backend.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}
