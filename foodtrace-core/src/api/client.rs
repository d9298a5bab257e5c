use metrics::{counter, histogram};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, IntoHeaderName};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::interceptors::{
    ErrorInterceptor, InterceptorHandle, Interceptors, RequestInterceptor, ResponseInterceptor,
};
use super::request::{ErrorContext, RequestConfig, RequestContext, ResponseContext};
use super::retry::{RetryPolicy, retry_call};
use crate::config::ApiSettings;
use crate::error::AppError;
use crate::observability::{request_id_interceptor, trace_context_interceptor};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub default_headers: HeaderMap,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_millis(1000),
            default_headers,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl From<&ApiSettings> for ClientConfig {
    fn from(settings: &ApiSettings) -> Self {
        ClientConfig::new(settings.base_url.clone())
            .timeout(settings.timeout())
            .retries(settings.retries)
            .retry_delay(settings.retry_delay())
    }
}

/// HTTP transport shared by every API wrapper.
///
/// The client never decides whether a token is valid; it attaches whatever
/// token it was last given through [`ApiClient::set_auth_token`].
pub struct ApiClient {
    http: Client,
    config: RwLock<ClientConfig>,
    interceptors: Interceptors,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            config: RwLock::new(config),
            interceptors: Interceptors::new(),
        })
    }

    /// Builds a client from settings and installs the correlation
    /// interceptors.
    pub fn from_settings(settings: &ApiSettings) -> Result<Self, AppError> {
        let client = Self::new(ClientConfig::from(settings))?;
        client.add_request_interceptor(request_id_interceptor());
        if settings.propagate_trace_context {
            client.add_request_interceptor(trace_context_interceptor());
        }
        Ok(client)
    }

    fn read_config(&self) -> std::sync::RwLockReadGuard<'_, ClientConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_config(&self) -> std::sync::RwLockWriteGuard<'_, ClientConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn base_url(&self) -> String {
        self.read_config().base_url.clone()
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.write_config().base_url = base_url.into();
    }

    pub fn timeout(&self) -> Duration {
        self.read_config().timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.write_config().timeout = timeout;
    }

    pub fn set_default_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.write_config().default_headers.insert(name, value);
    }

    pub fn set_auth_token(&self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.write_config().default_headers.insert(AUTHORIZATION, value);
            }
            Err(e) => tracing::error!(error = %e, "Auth token is not a valid header value"),
        }
    }

    pub fn remove_auth_token(&self) {
        self.write_config().default_headers.remove(AUTHORIZATION);
    }

    /// The bearer token currently attached to requests.
    pub fn auth_token(&self) -> Option<String> {
        self.read_config()
            .default_headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    }

    pub fn add_request_interceptor(&self, hook: RequestInterceptor) -> InterceptorHandle {
        self.interceptors.add_request(hook)
    }

    pub fn add_response_interceptor(&self, hook: ResponseInterceptor) -> InterceptorHandle {
        self.interceptors.add_response(hook)
    }

    pub fn add_error_interceptor(&self, hook: ErrorInterceptor) -> InterceptorHandle {
        self.interceptors.add_error(hook)
    }

    pub fn remove_request_interceptor(&self, handle: InterceptorHandle) -> bool {
        self.interceptors.remove_request(handle)
    }

    pub fn remove_response_interceptor(&self, handle: InterceptorHandle) -> bool {
        self.interceptors.remove_response(handle)
    }

    pub fn remove_error_interceptor(&self, handle: InterceptorHandle) -> bool {
        self.interceptors.remove_error(handle)
    }

    /// Absolute URLs pass through; relative ones are joined to the base URL.
    pub fn build_url(&self, url: &str) -> String {
        join_url(&self.read_config().base_url, url)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        self.request(RequestConfig::get(url)).await
    }

    pub async fn post<B, T>(&self, url: &str, body: &B) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(RequestConfig::post(url).json(body)?).await
    }

    pub async fn put<B, T>(&self, url: &str, body: &B) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(RequestConfig::put(url).json(body)?).await
    }

    pub async fn patch<B, T>(&self, url: &str, body: &B) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(RequestConfig::patch(url).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        self.request(RequestConfig::delete(url)).await
    }

    /// Sends `config` and decodes the JSON body into `T`.
    pub async fn request<T: DeserializeOwned>(&self, config: RequestConfig) -> Result<T, AppError> {
        let response = self.request_raw(config).await?;
        serde_json::from_value(response.body).map_err(|e| {
            AppError::unknown(format!("Failed to decode response body: {}", e))
                .with_code("RESPONSE_PARSE_ERROR")
                .with_status(response.status)
                .with_detail("url", response.url.clone())
        })
    }

    /// Sends `config` with retries and returns the undecoded response.
    #[instrument(skip(self, config), fields(method = %config.method, url = %config.url))]
    pub async fn request_raw(&self, config: RequestConfig) -> Result<ResponseContext, AppError> {
        let policy = {
            let defaults = self.read_config();
            RetryPolicy::new(
                config.retries.unwrap_or(defaults.retries),
                config.retry_delay.unwrap_or(defaults.retry_delay),
            )
        };
        let operation = format!("{} {}", config.method, config.url);

        retry_call(&policy, &operation, |attempt| {
            self.execute_once(&config, &policy, attempt)
        })
        .await
    }

    async fn execute_once(
        &self,
        config: &RequestConfig,
        policy: &RetryPolicy,
        attempt: u32,
    ) -> Result<ResponseContext, AppError> {
        let ctx = {
            let defaults = self.read_config();
            let mut headers = defaults.default_headers.clone();
            for (name, value) in config.headers.iter() {
                headers.insert(name.clone(), value.clone());
            }
            RequestContext {
                method: config.method.clone(),
                url: join_url(&defaults.base_url, &config.url),
                headers,
                body: config.body.clone(),
                timeout: config.timeout.unwrap_or(defaults.timeout),
                attempt,
            }
        };
        let ctx = self.interceptors.run_request(ctx);

        let started = Instant::now();
        let outcome = self.perform(&ctx).await;
        let elapsed = started.elapsed();

        let method_label = ctx.method.to_string();
        histogram!("api_client_request_duration_seconds", "method" => method_label.clone())
            .record(elapsed.as_secs_f64());

        match outcome {
            Ok(response) => {
                counter!(
                    "api_client_requests_total",
                    "method" => method_label,
                    "outcome" => "success"
                )
                .increment(1);
                debug!(
                    status = response.status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
                Ok(self.interceptors.run_response(response))
            }
            Err(error) => {
                counter!(
                    "api_client_requests_total",
                    "method" => method_label,
                    "outcome" => error.error_type.as_str()
                )
                .increment(1);
                let will_retry = policy.should_retry(&error, attempt);
                self.interceptors.run_error(&ErrorContext {
                    request: ctx,
                    error: error.clone(),
                    will_retry,
                });
                Err(error)
            }
        }
    }

    /// One network round trip. The send and body read run under the
    /// timeout; on expiry the future is dropped, which aborts the request.
    async fn perform(&self, ctx: &RequestContext) -> Result<ResponseContext, AppError> {
        let mut builder = self
            .http
            .request(ctx.method.clone(), &ctx.url)
            .headers(ctx.headers.clone());
        if let Some(body) = &ctx.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, bytes))
        };

        let (status, headers, bytes) = match tokio::time::timeout(ctx.timeout, exchange).await {
            Err(_) => {
                return Err(AppError::timeout(format!(
                    "Request to {} timed out after {}ms",
                    ctx.url,
                    ctx.timeout.as_millis()
                ))
                .with_detail("method", ctx.method.as_str())
                .with_detail("url", ctx.url.clone())
                .with_detail("timeout_ms", ctx.timeout.as_millis() as u64)
                .with_detail("attempt", ctx.attempt));
            }
            Ok(Err(e)) => {
                return Err(AppError::from(e)
                    .with_detail("method", ctx.method.as_str())
                    .with_detail("attempt", ctx.attempt));
            }
            Ok(Ok(parts)) => parts,
        };

        let body = decode_body(&bytes);
        if !(200..300).contains(&status) {
            return Err(
                AppError::from_status(status, &body, ctx.method.as_str(), &ctx.url)
                    .with_detail("attempt", ctx.attempt),
            );
        }

        Ok(ResponseContext {
            method: ctx.method.clone(),
            url: ctx.url.clone(),
            status,
            headers,
            body,
            duration: started.elapsed(),
        })
    }
}

fn join_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if url.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// JSON when possible, the raw text otherwise, `Null` when empty.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://api/v1", "/batches"), "http://api/v1/batches");
        assert_eq!(join_url("http://api/v1/", "batches"), "http://api/v1/batches");
        assert_eq!(join_url("http://api/v1", ""), "http://api/v1");
        assert_eq!(
            join_url("http://api/v1", "https://cdn.example.com/report.pdf"),
            "https://cdn.example.com/report.pdf"
        );
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(b""), Value::Null);
        assert_eq!(decode_body(br#"{"ok":true}"#), serde_json::json!({"ok": true}));
        assert_eq!(decode_body(b"Bad Gateway"), Value::String("Bad Gateway".into()));
    }

    #[test]
    fn test_auth_token_roundtrip() {
        let client = ApiClient::new(ClientConfig::new("http://localhost")).unwrap();
        assert_eq!(client.auth_token(), None);
        client.set_auth_token("t1");
        assert_eq!(client.auth_token(), Some("t1".to_string()));
        client.remove_auth_token();
        assert_eq!(client.auth_token(), None);
    }

    #[test]
    fn test_setters() {
        let client = ApiClient::new(ClientConfig::new("http://localhost")).unwrap();
        client.set_base_url("https://trace.example.com/api");
        client.set_timeout(Duration::from_secs(5));
        assert_eq!(client.base_url(), "https://trace.example.com/api");
        assert_eq!(client.timeout(), Duration::from_secs(5));
        assert_eq!(client.build_url("lots"), "https://trace.example.com/api/lots");
    }
}
