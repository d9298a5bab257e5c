//! Normalized error taxonomy shared by every component of the runtime.
//!
//! Every failure that crosses the `ApiClient` boundary is an [`AppError`]
//! carrying exactly one [`ErrorType`] tag, a stable machine-readable code and
//! an optional HTTP status. Callers branch on those fields, never on the
//! message text.
//!
//! | HTTP status | ErrorType |
//! |-------------|-----------|
//! | 400, 422 | `Validation` |
//! | 401 | `Authentication` |
//! | 403 | `Authorization` |
//! | 404 | `NotFound` |
//! | other 4xx | `ClientError` |
//! | 5xx | `ServerError` |
//! | anything else | `Api` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    Network,
    Timeout,
    Api,
    Validation,
    Authentication,
    Authorization,
    NotFound,
    ServerError,
    ClientError,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "NETWORK",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::Api => "API",
            ErrorType::Validation => "VALIDATION",
            ErrorType::Authentication => "AUTHENTICATION",
            ErrorType::Authorization => "AUTHORIZATION",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::ServerError => "SERVER_ERROR",
            ErrorType::ClientError => "CLIENT_ERROR",
            ErrorType::Unknown => "UNKNOWN",
        }
    }

    /// Code used when the failure source does not supply its own.
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorType::Network => "NETWORK_ERROR",
            ErrorType::Timeout => "REQUEST_TIMEOUT",
            ErrorType::Api => "API_ERROR",
            ErrorType::Validation => "VALIDATION_ERROR",
            ErrorType::Authentication => "AUTHENTICATION_FAILED",
            ErrorType::Authorization => "ACCESS_DENIED",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::ServerError => "SERVER_ERROR",
            ErrorType::ClientError => "CLIENT_ERROR",
            ErrorType::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Only transport failures and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorType::Network | ErrorType::Timeout | ErrorType::ServerError
        )
    }

    /// Maps an HTTP status code onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorType::Validation,
            401 => ErrorType::Authentication,
            403 => ErrorType::Authorization,
            404 => ErrorType::NotFound,
            402..=499 => ErrorType::ClientError,
            500..=599 => ErrorType::ServerError,
            _ => ErrorType::Api,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display language for [`AppError::user_message`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Locale {
    #[default]
    En,
    ZhCn,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AppError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Original error and request context.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl AppError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code: error_type.default_code().to_string(),
            message: message.into(),
            status_code: None,
            details: Value::Null,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Authorization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorType::NotFound, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Unknown, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Adds one entry to the `details` bag, turning it into an object if needed.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.details.is_object() {
            self.details = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Builds the error for a non-2xx HTTP response.
    ///
    /// The server's `message`/`error` and `code` fields are used when the body
    /// carries them.
    pub fn from_status(status: u16, body: &Value, method: &str, url: &str) -> Self {
        let error_type = ErrorType::from_status(status);
        let message = body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {}", status));
        let code = body
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error_type.default_code().to_string());

        Self {
            error_type,
            code,
            message,
            status_code: Some(status),
            details: json!({
                "method": method,
                "url": url,
                "response": body,
            }),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error_type.is_retryable()
    }

    /// Human-readable message derived purely from the tag.
    pub fn user_message(&self, locale: Locale) -> &'static str {
        match (locale, self.error_type) {
            (Locale::En, ErrorType::Network) => {
                "Network connection failed. Please check your connection and try again."
            }
            (Locale::En, ErrorType::Timeout) => "The request timed out. Please try again.",
            (Locale::En, ErrorType::Api) => "The server returned an unexpected response.",
            (Locale::En, ErrorType::Validation) => "Some of the submitted data is invalid.",
            (Locale::En, ErrorType::Authentication) => {
                "Your session is invalid or has expired. Please sign in again."
            }
            (Locale::En, ErrorType::Authorization) => {
                "You do not have permission to perform this action."
            }
            (Locale::En, ErrorType::NotFound) => "The requested resource was not found.",
            (Locale::En, ErrorType::ServerError) => {
                "The server encountered an error. Please try again later."
            }
            (Locale::En, ErrorType::ClientError) => "The request could not be processed.",
            (Locale::En, ErrorType::Unknown) => "An unexpected error occurred.",
            (Locale::ZhCn, ErrorType::Network) => "网络连接失败，请检查网络后重试",
            (Locale::ZhCn, ErrorType::Timeout) => "请求超时，请稍后重试",
            (Locale::ZhCn, ErrorType::Api) => "服务器返回了异常响应",
            (Locale::ZhCn, ErrorType::Validation) => "提交的数据不合法",
            (Locale::ZhCn, ErrorType::Authentication) => "登录已失效，请重新登录",
            (Locale::ZhCn, ErrorType::Authorization) => "您没有执行此操作的权限",
            (Locale::ZhCn, ErrorType::NotFound) => "请求的资源不存在",
            (Locale::ZhCn, ErrorType::ServerError) => "服务器错误，请稍后重试",
            (Locale::ZhCn, ErrorType::ClientError) => "请求无法处理",
            (Locale::ZhCn, ErrorType::Unknown) => "发生未知错误",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        let base = if err.is_timeout() {
            AppError::timeout(format!("Request timed out: {}", err))
        } else if err.is_decode() {
            AppError::unknown(format!("Failed to decode response: {}", err))
                .with_code("RESPONSE_PARSE_ERROR")
        } else {
            AppError::network(format!("HTTP request failed: {}", err))
        };
        let base = base.with_detail("source", err.to_string()).with_detail("url", url);
        match err.status() {
            Some(status) => base.with_status(status.as_u16()),
            None => base,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let fields: Vec<String> = err.field_errors().keys().map(|k| k.to_string()).collect();
        AppError::validation(format!("Validation error: {}", err)).with_detail("fields", fields)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::unknown(format!("Serialization error: {}", err)).with_code("SERIALIZATION_ERROR")
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::unknown(format!("Configuration error: {}", err)).with_code("CONFIG_ERROR")
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // An AppError wrapped in anyhow keeps its tag.
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => AppError::unknown(other.to_string())
                .with_detail("source", format!("{:#}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorType::from_status(400), ErrorType::Validation);
        assert_eq!(ErrorType::from_status(401), ErrorType::Authentication);
        assert_eq!(ErrorType::from_status(403), ErrorType::Authorization);
        assert_eq!(ErrorType::from_status(404), ErrorType::NotFound);
        assert_eq!(ErrorType::from_status(409), ErrorType::ClientError);
        assert_eq!(ErrorType::from_status(422), ErrorType::Validation);
        assert_eq!(ErrorType::from_status(503), ErrorType::ServerError);
        assert_eq!(ErrorType::from_status(302), ErrorType::Api);
    }

    #[test]
    fn test_only_transport_and_server_errors_retry() {
        assert!(ErrorType::Network.is_retryable());
        assert!(ErrorType::Timeout.is_retryable());
        assert!(ErrorType::ServerError.is_retryable());
        assert!(!ErrorType::NotFound.is_retryable());
        assert!(!ErrorType::Validation.is_retryable());
        assert!(!ErrorType::Authentication.is_retryable());
    }

    #[test]
    fn test_from_status_uses_server_message_and_code() {
        let body = json!({"message": "Batch is locked", "code": "BATCH_LOCKED"});
        let err = AppError::from_status(409, &body, "PUT", "http://api/batches/1");
        assert_eq!(err.error_type, ErrorType::ClientError);
        assert_eq!(err.code, "BATCH_LOCKED");
        assert_eq!(err.message, "Batch is locked");
        assert_eq!(err.status_code, Some(409));
        assert_eq!(err.details["url"], "http://api/batches/1");
    }

    #[test]
    fn test_from_status_without_body() {
        let err = AppError::from_status(503, &Value::Null, "GET", "http://api/x");
        assert_eq!(err.error_type, ErrorType::ServerError);
        assert_eq!(err.code, "SERVER_ERROR");
        assert_eq!(err.message, "Request failed with status 503");
    }

    #[test]
    fn test_type_tag_serialization() {
        let err = AppError::not_found("missing");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "NOT_FOUND");
        assert_eq!(value["code"], "NOT_FOUND");
    }

    #[test]
    fn test_user_message_depends_only_on_type() {
        let a = AppError::timeout("first").with_code("A");
        let b = AppError::timeout("second").with_code("B");
        assert_eq!(a.user_message(Locale::En), b.user_message(Locale::En));
        assert_eq!(a.user_message(Locale::ZhCn), "请求超时，请稍后重试");
    }

    #[test]
    fn test_anyhow_preserves_app_error() {
        let err: AppError = anyhow::Error::new(AppError::authorization("nope")).into();
        assert_eq!(err.error_type, ErrorType::Authorization);

        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.error_type, ErrorType::Unknown);
    }
}
