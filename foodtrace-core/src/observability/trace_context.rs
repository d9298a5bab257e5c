//! W3C Trace Context propagation for outgoing API calls.
//!
//! Helpers to inject and extract `traceparent`/`tracestate` headers, plus the
//! request interceptors the `ApiClient` installs to stamp every outgoing
//! request with trace and correlation headers.
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::trace::TraceContextExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::api::interceptors::{RequestInterceptor, request_hook};

/// Header name for W3C traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header name for W3C tracestate
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Header name for request correlation ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Inject the current span's trace context into HTTP request headers.
///
/// Leaves the headers untouched when there is no valid span context.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if span_context.is_valid() {
        // version-trace_id-span_id-trace_flags
        let traceparent = format!(
            "00-{}-{}-{:02x}",
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags().to_u8()
        );

        if let Ok(value) = traceparent.parse() {
            headers.insert(TRACEPARENT_HEADER, value);
        }

        let tracestate_str = span_context.trace_state().header();
        if !tracestate_str.is_empty()
            && let Ok(value) = tracestate_str.parse()
        {
            headers.insert(TRACESTATE_HEADER, value);
        }
    }
}

pub fn extract_traceparent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_tracestate(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TRACESTATE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Request interceptor propagating the caller's span to the backend.
pub fn trace_context_interceptor() -> RequestInterceptor {
    request_hook(|mut ctx| {
        inject_trace_context(&mut ctx.headers);
        Ok(ctx)
    })
}

/// Request interceptor adding an `x-request-id` when the caller set none.
pub fn request_id_interceptor() -> RequestInterceptor {
    request_hook(|mut ctx| {
        if !ctx.headers.contains_key(REQUEST_ID_HEADER) {
            let id = uuid::Uuid::new_v4().to_string();
            ctx.headers
                .insert(REQUEST_ID_HEADER, HeaderValue::from_str(&id)?);
        }
        Ok(ctx)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::RequestContext;
    use reqwest::Method;
    use std::time::Duration;

    #[test]
    fn test_inject_empty_context() {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        // Without an active span, headers should be empty
        assert!(headers.is_empty());
    }

    #[test]
    fn test_extract_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT_HEADER,
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
                .parse()
                .unwrap(),
        );

        assert_eq!(
            extract_traceparent(&headers),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string())
        );
        assert_eq!(extract_tracestate(&headers), None);
    }

    #[test]
    fn test_request_id_interceptor_keeps_existing_id() {
        let hook = request_id_interceptor();
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, "abc-123".parse().unwrap());
        let ctx = RequestContext {
            method: Method::GET,
            url: "http://localhost/x".to_string(),
            headers,
            body: None,
            timeout: Duration::from_secs(1),
            attempt: 0,
        };

        let ctx = hook(ctx).unwrap();
        assert_eq!(extract_request_id(&ctx.headers), Some("abc-123".to_string()));

        let fresh = hook(RequestContext {
            headers: HeaderMap::new(),
            ..ctx
        })
        .unwrap();
        let id = extract_request_id(&fresh.headers).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
