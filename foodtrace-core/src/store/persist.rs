//! Persistence middleware.
//!
//! On construction the store's previous snapshot is read from storage,
//! migrated if it was written by another schema version, and merged into the
//! initial state. After every transition the `partialize`d projection is
//! queued for writing. A single writer task per store drains the queue in
//! order, so writes to the store's key never overtake each other.
//!
//! Storage layout: key `<store name>`, value
//! `{"state": <snapshot>, "version": <int>, "timestamp": <epoch millis>}`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::StoreState;
use super::middleware::{Middleware, SetState, StoreApi};
use crate::error::AppError;
use crate::storage::StorageAdapter;

/// A store state with a persisted projection.
pub trait Persisted: StoreState {
    type Snapshot: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Schema version written alongside every snapshot.
    const VERSION: u32;

    fn partialize(&self) -> Self::Snapshot;

    fn merge(&mut self, snapshot: Self::Snapshot);

    /// Upgrades a snapshot written under `from_version`.
    fn migrate(state: Value, from_version: u32) -> Result<Value, AppError> {
        let _ = from_version;
        Ok(state)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedEnvelope {
    pub state: Value,
    pub version: u32,
    pub timestamp: i64,
}

enum WriteCommand {
    Write(String),
    Flush(oneshot::Sender<()>),
}

pub struct PersistMiddleware<S> {
    key: String,
    storage: StorageAdapter,
    writer: mpsc::UnboundedSender<WriteCommand>,
    _state: PhantomData<fn() -> S>,
}

impl<S: Persisted> PersistMiddleware<S> {
    /// Spawns the writer task; must be called inside a Tokio runtime.
    pub fn new(key: impl Into<String>, storage: StorageAdapter) -> Self {
        let key = key.into();
        let (writer, mut queue) = mpsc::unbounded_channel::<WriteCommand>();

        let task_storage = storage.clone();
        let task_key = key.clone();
        tokio::spawn(async move {
            while let Some(command) = queue.recv().await {
                match command {
                    WriteCommand::Write(raw) => task_storage.set_item(&task_key, &raw).await,
                    WriteCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!(key = %task_key, "Persist writer stopped");
        });

        Self {
            key,
            storage,
            writer,
            _state: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the stored snapshot, migrating it to the current version.
    pub async fn load(&self) -> Option<S::Snapshot> {
        let envelope: PersistedEnvelope = self.storage.get_data(&self.key).await?;

        let state = if envelope.version == S::VERSION {
            envelope.state
        } else {
            match S::migrate(envelope.state, envelope.version) {
                Ok(migrated) => migrated,
                Err(e) => {
                    warn!(
                        key = %self.key,
                        from = envelope.version,
                        to = S::VERSION,
                        error = %e,
                        "Snapshot migration failed, ignoring stored state"
                    );
                    return None;
                }
            }
        };

        match serde_json::from_value(state) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    key = %self.key,
                    error = %e,
                    "Stored snapshot does not match schema, ignoring"
                );
                None
            }
        }
    }
}

fn encode_snapshot<S: Persisted>(state: &S) -> Result<String, serde_json::Error> {
    let envelope = PersistedEnvelope {
        state: serde_json::to_value(state.partialize())?,
        version: S::VERSION,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    serde_json::to_string(&envelope)
}

#[async_trait]
impl<S: Persisted> Middleware<S> for PersistMiddleware<S> {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn init(&self, state: &mut S) {
        if let Some(snapshot) = self.load().await {
            debug!(key = %self.key, "Hydrating store from persisted snapshot");
            state.merge(snapshot);
        }
    }

    fn wrap(&self, next: SetState<S>, api: StoreApi<S>) -> SetState<S> {
        let writer = self.writer.clone();
        let key = self.key.clone();
        Arc::new(move |action: &str, mutation: &mut dyn FnMut(&mut S)| {
            next(action, mutation);
            match api.with_state(encode_snapshot) {
                Ok(raw) => {
                    if writer.send(WriteCommand::Write(raw)).is_err() {
                        warn!(key = %key, action, "Persist writer gone, snapshot dropped");
                    }
                }
                Err(e) => warn!(key = %key, action, error = %e, "Failed to encode snapshot"),
            }
        })
    }

    async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writer.send(WriteCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
