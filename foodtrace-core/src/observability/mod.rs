pub mod logging;
pub mod trace_context;

pub use logging::init_tracing;
pub use trace_context::{
    REQUEST_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER, extract_request_id,
    extract_traceparent, extract_tracestate, inject_trace_context, request_id_interceptor,
    trace_context_interceptor,
};
