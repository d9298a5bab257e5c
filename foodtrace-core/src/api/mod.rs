//! Cross-platform HTTP transport.
//!
//! Each request goes through: URL resolution, header merge, request
//! interceptors, the timed network call, then response or error interceptors,
//! and finally the retry decision.

pub mod client;
pub mod endpoints;
pub mod interceptors;
pub mod request;
pub mod retry;

pub use client::{ApiClient, ClientConfig};
pub use endpoints::{AuthEndpoints, BatchEndpoints, Endpoints};
pub use interceptors::{
    ErrorInterceptor, InterceptorHandle, RequestInterceptor, ResponseInterceptor, error_hook,
    request_hook, response_hook,
};
pub use request::{ErrorContext, RequestConfig, RequestContext, ResponseContext};
pub use retry::RetryPolicy;
