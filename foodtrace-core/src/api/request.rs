//! Request, response and error contexts flowing through the client pipeline.

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue, IntoHeaderName};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::AppError;

/// Caller-facing description of one request.
///
/// `timeout`, `retries` and `retry_delay` override the client defaults when
/// set.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            retries: None,
            retry_delay: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, AppError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// The fully resolved request seen by request interceptors.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Client defaults merged with per-call headers.
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
    /// Zero for the first attempt.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub method: Method,
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    /// Decoded JSON body, `Value::Null` when the body is empty.
    pub body: Value,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request: RequestContext,
    pub error: AppError,
    /// Whether the client is going to retry after this failure.
    pub will_retry: bool,
}
