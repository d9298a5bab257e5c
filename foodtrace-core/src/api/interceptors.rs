//! Ordered interceptor chains for the HTTP client.
//!
//! A request or response interceptor returns the (possibly transformed)
//! context; an error interceptor only observes. A hook that returns an error
//! or panics is logged and skipped, and the context it was given continues
//! down the chain unchanged.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

use super::request::{ErrorContext, RequestContext, ResponseContext};

pub type RequestInterceptor =
    Arc<dyn Fn(RequestContext) -> anyhow::Result<RequestContext> + Send + Sync>;

pub type ResponseInterceptor =
    Arc<dyn Fn(ResponseContext) -> anyhow::Result<ResponseContext> + Send + Sync>;

pub type ErrorInterceptor = Arc<dyn Fn(&ErrorContext) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure as a [`RequestInterceptor`].
pub fn request_hook<F>(hook: F) -> RequestInterceptor
where
    F: Fn(RequestContext) -> anyhow::Result<RequestContext> + Send + Sync + 'static,
{
    Arc::new(hook)
}

pub fn response_hook<F>(hook: F) -> ResponseInterceptor
where
    F: Fn(ResponseContext) -> anyhow::Result<ResponseContext> + Send + Sync + 'static,
{
    Arc::new(hook)
}

pub fn error_hook<F>(hook: F) -> ErrorInterceptor
where
    F: Fn(&ErrorContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(hook)
}

/// Identifies a registered interceptor for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorHandle(u64);

struct Chain<T> {
    entries: RwLock<Vec<(InterceptorHandle, T)>>,
}

impl<T: Clone> Chain<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, handle: InterceptorHandle, hook: T) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push((handle, hook));
    }

    fn remove(&self, handle: InterceptorHandle) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != before
    }

    /// Copies the hooks out so none run under the lock.
    fn snapshot(&self) -> Vec<T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(_, hook)| hook.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct Interceptors {
    next_id: AtomicU64,
    request: Chain<RequestInterceptor>,
    response: Chain<ResponseInterceptor>,
    error: Chain<ErrorInterceptor>,
}

impl Default for Interceptors {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptors {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            request: Chain::new(),
            response: Chain::new(),
            error: Chain::new(),
        }
    }

    fn next_handle(&self) -> InterceptorHandle {
        InterceptorHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_request(&self, hook: RequestInterceptor) -> InterceptorHandle {
        let handle = self.next_handle();
        self.request.push(handle, hook);
        handle
    }

    pub fn add_response(&self, hook: ResponseInterceptor) -> InterceptorHandle {
        let handle = self.next_handle();
        self.response.push(handle, hook);
        handle
    }

    pub fn add_error(&self, hook: ErrorInterceptor) -> InterceptorHandle {
        let handle = self.next_handle();
        self.error.push(handle, hook);
        handle
    }

    pub fn remove_request(&self, handle: InterceptorHandle) -> bool {
        self.request.remove(handle)
    }

    pub fn remove_response(&self, handle: InterceptorHandle) -> bool {
        self.response.remove(handle)
    }

    pub fn remove_error(&self, handle: InterceptorHandle) -> bool {
        self.error.remove(handle)
    }

    pub fn len(&self) -> usize {
        self.request.len() + self.response.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn run_request(&self, mut ctx: RequestContext) -> RequestContext {
        for (index, hook) in self.request.snapshot().into_iter().enumerate() {
            let fallback = ctx.clone();
            ctx = match catch_unwind(AssertUnwindSafe(|| hook(ctx))) {
                Ok(Ok(next)) => next,
                Ok(Err(e)) => {
                    warn!(
                        index,
                        error = %e,
                        url = %fallback.url,
                        "Request interceptor failed, skipping"
                    );
                    fallback
                }
                Err(_) => {
                    warn!(index, url = %fallback.url, "Request interceptor panicked, skipping");
                    fallback
                }
            };
        }
        ctx
    }

    pub fn run_response(&self, mut ctx: ResponseContext) -> ResponseContext {
        for (index, hook) in self.response.snapshot().into_iter().enumerate() {
            let fallback = ctx.clone();
            ctx = match catch_unwind(AssertUnwindSafe(|| hook(ctx))) {
                Ok(Ok(next)) => next,
                Ok(Err(e)) => {
                    warn!(
                        index,
                        error = %e,
                        url = %fallback.url,
                        "Response interceptor failed, skipping"
                    );
                    fallback
                }
                Err(_) => {
                    warn!(index, url = %fallback.url, "Response interceptor panicked, skipping");
                    fallback
                }
            };
        }
        ctx
    }

    pub fn run_error(&self, ctx: &ErrorContext) {
        for (index, hook) in self.error.snapshot().into_iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| hook(ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(index, error = %e, url = %ctx.request.url, "Error interceptor failed");
                }
                Err(_) => {
                    warn!(index, url = %ctx.request.url, "Error interceptor panicked");
                }
            }
        }
    }
}
