//! Middleware contract for [`BaseStore`](super::BaseStore).
//!
//! Every state transition goes through a `SetState` function. A middleware
//! receives the next function in the chain and returns a replacement that
//! runs its own logic around the call. The store composes its middleware
//! list once, at construction, with the first entry outermost.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::StoreState;

/// Applies a named mutation to the store state.
pub type SetState<S> = Arc<dyn Fn(&str, &mut dyn FnMut(&mut S)) + Send + Sync>;

/// Read access to the live state, handed to middleware at composition time.
pub struct StoreApi<S> {
    sender: Arc<watch::Sender<S>>,
}

impl<S> Clone for StoreApi<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S: StoreState> StoreApi<S> {
    pub(crate) fn new(sender: Arc<watch::Sender<S>>) -> Self {
        Self { sender }
    }

    pub fn get_state(&self) -> S {
        self.sender.borrow().clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.sender.borrow())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<S> {
        self.sender.subscribe()
    }

    /// Innermost setter: mutates the channel value and notifies subscribers.
    pub(crate) fn base_setter(&self) -> SetState<S> {
        let sender = self.sender.clone();
        Arc::new(move |_action: &str, mutation: &mut dyn FnMut(&mut S)| {
            sender.send_modify(|state| mutation(state));
        })
    }
}

#[async_trait]
pub trait Middleware<S: StoreState>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once on the initial state before the store is published.
    async fn init(&self, _state: &mut S) {}

    fn wrap(&self, next: SetState<S>, api: StoreApi<S>) -> SetState<S>;

    /// Waits for any work the middleware deferred.
    async fn flush(&self) {}
}

/// Folds `middlewares` around `base`, first entry outermost.
pub(crate) fn compose<S: StoreState>(
    base: SetState<S>,
    middlewares: &[Arc<dyn Middleware<S>>],
    api: &StoreApi<S>,
) -> SetState<S> {
    middlewares
        .iter()
        .rev()
        .fold(base, |next, middleware| middleware.wrap(next, api.clone()))
}
