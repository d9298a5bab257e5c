//! Reactive state container shared by every domain store.
//!
//! A [`BaseStore`] owns its state in a `watch` channel: readers take
//! snapshots or subscribe for changes, writers go through the composed
//! middleware chain with a named action. Mutation closures run under the
//! channel's write lock and must not read the same store.

pub mod devtools;
pub mod middleware;
pub mod persist;

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::AppError;
use crate::storage::StorageAdapter;

pub use devtools::DevtoolsMiddleware;
pub use middleware::{Middleware, SetState, StoreApi};
pub use persist::{PersistMiddleware, Persisted, PersistedEnvelope};

/// Bookkeeping every store carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseState {
    /// True while a tracked operation is in flight.
    pub loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub trait StoreState: Clone + Debug + Send + Sync + 'static {
    fn base(&self) -> &BaseState;

    fn base_mut(&mut self) -> &mut BaseState;
}

impl StoreState for BaseState {
    fn base(&self) -> &BaseState {
        self
    }

    fn base_mut(&mut self) -> &mut BaseState {
        self
    }
}

/// One deferred mutation, as accepted by [`BaseStore::batch`].
pub type StateUpdate<S> = Box<dyn FnOnce(&mut S) + Send>;

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorCallback = Box<dyn FnOnce(&AppError) + Send>;

/// Hooks for [`BaseStore::handle_async_operation`].
pub struct AsyncOperationOptions<T> {
    pub success_callback: Option<SuccessCallback<T>>,
    pub error_callback: Option<ErrorCallback>,
    /// Label used when the failure is logged.
    pub context: Option<String>,
}

impl<T> Default for AsyncOperationOptions<T> {
    fn default() -> Self {
        Self {
            success_callback: None,
            error_callback: None,
            context: None,
        }
    }
}

impl<T> AsyncOperationOptions<T> {
    pub fn context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..Default::default()
        }
    }

    pub fn on_success(mut self, callback: impl FnOnce(&T) + Send + 'static) -> Self {
        self.success_callback = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&AppError) + Send + 'static) -> Self {
        self.error_callback = Some(Box::new(callback));
        self
    }
}

pub struct StoreBuilder<S: StoreState> {
    name: String,
    initial: S,
    middlewares: Vec<Arc<dyn Middleware<S>>>,
}

impl<S: StoreState> StoreBuilder<S> {
    pub fn new(name: impl Into<String>, initial: S) -> Self {
        Self {
            name: name.into(),
            initial,
            middlewares: Vec::new(),
        }
    }

    /// Appends a middleware; earlier entries wrap later ones.
    pub fn with(mut self, middleware: Arc<dyn Middleware<S>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_devtools(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        let devtools = Arc::new(DevtoolsMiddleware::new(self.name.clone()));
        self.with(devtools)
    }

    /// Runs each middleware's `init` on the initial state, then publishes it.
    pub async fn build(self) -> BaseStore<S> {
        let mut state = self.initial.clone();
        for middleware in &self.middlewares {
            middleware.init(&mut state).await;
        }

        let (sender, _) = watch::channel(state);
        let api = StoreApi::new(Arc::new(sender));
        let setter = middleware::compose(api.base_setter(), &self.middlewares, &api);

        debug!(
            store = %self.name,
            middleware = ?self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "Store created"
        );

        BaseStore {
            name: self.name,
            initial: self.initial,
            api,
            setter,
            middlewares: self.middlewares,
        }
    }
}

impl<S: Persisted> StoreBuilder<S> {
    /// Persists under the store name; a disabled store keeps no snapshot.
    pub fn with_persistence(self, storage: &StorageAdapter, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        let persist = Arc::new(PersistMiddleware::<S>::new(self.name.clone(), storage.clone()));
        self.with(persist)
    }
}

pub struct BaseStore<S: StoreState> {
    name: String,
    initial: S,
    api: StoreApi<S>,
    setter: SetState<S>,
    middlewares: Vec<Arc<dyn Middleware<S>>>,
}

impl<S: StoreState> BaseStore<S> {
    pub fn builder(name: impl Into<String>, initial: S) -> StoreBuilder<S> {
        StoreBuilder::new(name, initial)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_state(&self) -> S {
        self.api.get_state()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.api.with_state(f)
    }

    /// A receiver that observes every committed transition.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.api.subscribe()
    }

    pub fn set_state(&self, action: &str, update: impl FnOnce(&mut S)) {
        let mut update = Some(update);
        (self.setter)(action, &mut |state| {
            if let Some(update) = update.take() {
                update(state);
            }
        });
    }

    /// Applies several updates as one transition with one notification.
    pub fn batch(&self, action: &str, updates: Vec<StateUpdate<S>>) {
        self.set_state(action, |state| {
            for update in updates {
                update(state);
            }
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.set_state("set_loading", |state| state.base_mut().loading = loading);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.set_state("set_error", |state| state.base_mut().error = error);
    }

    pub fn clear_error(&self) {
        self.set_state("clear_error", |state| state.base_mut().error = None);
    }

    pub fn update_timestamp(&self) {
        self.set_state("update_timestamp", |state| {
            state.base_mut().last_updated = Some(Utc::now());
        });
    }

    /// Restores the state the store was built with, before hydration.
    pub fn reset(&self) {
        let initial = self.initial.clone();
        self.set_state("reset", |state| *state = initial);
    }

    /// Runs `operation` with loading/error bookkeeping and hands the failure
    /// back to the caller.
    pub async fn track_operation<T, Fut>(
        &self,
        context: &str,
        operation: Fut,
    ) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.set_state("operation_start", |state| {
            let base = state.base_mut();
            base.loading = true;
            base.error = None;
        });

        match operation.await {
            Ok(value) => {
                self.set_state("operation_success", |state| {
                    let base = state.base_mut();
                    base.loading = false;
                    base.last_updated = Some(Utc::now());
                });
                Ok(value)
            }
            Err(e) => {
                error!(
                    store = %self.name,
                    context,
                    error_type = %e.error_type,
                    code = %e.code,
                    error = %e.message,
                    "Store operation failed"
                );
                let message = e.message.clone();
                self.set_state("operation_error", |state| {
                    let base = state.base_mut();
                    base.loading = false;
                    base.error = Some(message);
                });
                Err(e)
            }
        }
    }

    /// Like [`track_operation`](Self::track_operation), but the failure is
    /// only recorded and reported, never returned.
    pub async fn handle_async_operation<T, Fut>(
        &self,
        operation: Fut,
        options: AsyncOperationOptions<T>,
    ) -> Option<T>
    where
        Fut: Future<Output = Result<T, AppError>>,
    {
        let context = options.context.as_deref().unwrap_or("async_operation");
        match self.track_operation(context, operation).await {
            Ok(value) => {
                if let Some(callback) = options.success_callback {
                    callback(&value);
                }
                Some(value)
            }
            Err(e) => {
                if let Some(callback) = options.error_callback {
                    callback(&e);
                }
                None
            }
        }
    }

    /// Waits until every middleware has finished deferred work, such as
    /// queued snapshot writes.
    pub async fn flush(&self) {
        for middleware in &self.middlewares {
            middleware.flush().await;
        }
    }
}

impl<S: StoreState> Debug for BaseStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseStore")
            .field("name", &self.name)
            .field("middleware", &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish()
    }
}
