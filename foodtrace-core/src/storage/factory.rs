//! Backend selection.
//!
//! An explicit backend in the settings wins. In `auto` mode the factory
//! probes what the environment offers: a reachable Redis when a URL is
//! configured, then a writable data directory, then memory. Memory is also
//! the fallback whenever the chosen backend fails to start.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    FileBackend, MemoryBackend, RedisBackend, StorageAdapter, StorageBackend,
    StorageErrorCallback,
};
use crate::config::{StorageBackendKind, StorageSettings};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn create_storage_adapter(
    settings: &StorageSettings,
    on_error: Option<StorageErrorCallback>,
) -> StorageAdapter {
    let backend = select_backend(settings).await;
    info!(backend = backend.name(), prefix = %settings.prefix, "Storage backend selected");

    let adapter = StorageAdapter::new(backend, settings.prefix.clone());
    match on_error {
        Some(callback) => adapter.with_error_handler(callback),
        None => adapter,
    }
}

pub async fn select_backend(settings: &StorageSettings) -> Arc<dyn StorageBackend> {
    match settings.backend {
        StorageBackendKind::Memory => memory(),
        StorageBackendKind::File => match try_file(settings).await {
            Some(backend) => backend,
            None => fallback("file"),
        },
        StorageBackendKind::Redis => match try_redis(settings).await {
            Some(backend) => backend,
            None => fallback("redis"),
        },
        StorageBackendKind::Auto => {
            if let Some(backend) = try_redis(settings).await {
                return backend;
            }
            if let Some(backend) = try_file(settings).await {
                return backend;
            }
            memory()
        }
    }
}

fn memory() -> Arc<dyn StorageBackend> {
    Arc::new(MemoryBackend::new())
}

fn fallback(requested: &str) -> Arc<dyn StorageBackend> {
    warn!(requested, "Storage backend unavailable, falling back to memory");
    memory()
}

async fn try_redis(settings: &StorageSettings) -> Option<Arc<dyn StorageBackend>> {
    let url = settings.redis_url.as_deref()?;
    match RedisBackend::connect(url, REDIS_CONNECT_TIMEOUT).await {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            warn!(error = %e, "Redis storage not reachable");
            None
        }
    }
}

async fn try_file(settings: &StorageSettings) -> Option<Arc<dyn StorageBackend>> {
    let dir = settings.data_dir.as_ref()?;
    match FileBackend::open_writable(dir).await {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            warn!(error = %e, dir = %dir.display(), "Data directory not writable");
            None
        }
    }
}
