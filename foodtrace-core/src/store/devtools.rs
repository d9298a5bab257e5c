use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::StoreState;
use super::middleware::{Middleware, SetState, StoreApi};

/// Logs every transition with its action name and the state on both sides.
///
/// Only installed when enabled; a disabled store has no devtools layer at all.
pub struct DevtoolsMiddleware {
    store_name: String,
}

impl DevtoolsMiddleware {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
        }
    }
}

#[async_trait]
impl<S: StoreState> Middleware<S> for DevtoolsMiddleware {
    fn name(&self) -> &'static str {
        "devtools"
    }

    fn wrap(&self, next: SetState<S>, api: StoreApi<S>) -> SetState<S> {
        let store = self.store_name.clone();
        Arc::new(move |action: &str, mutation: &mut dyn FnMut(&mut S)| {
            let previous = api.get_state();
            next(action, mutation);
            api.with_state(|current| {
                debug!(
                    store = %store,
                    action,
                    previous = ?previous,
                    next = ?current,
                    "State transition"
                );
            });
        })
    }
}
