use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};

use super::Headers;

/// W3C trace context propagated through message headers and HTTP calls.
/// Business handlers pass it along; they never look inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    span: SpanContext,
}

impl TraceContext {
    pub fn new_root() -> Self {
        let ids = RandomIdGenerator::default();
        Self::with_parent(ids.new_trace_id(), TraceFlags::SAMPLED)
    }

    /// Same trace, fresh span.
    pub fn child(&self) -> Self {
        Self::with_parent(self.span.trace_id(), self.span.trace_flags())
    }

    fn with_parent(trace_id: TraceId, flags: TraceFlags) -> Self {
        let span_id = RandomIdGenerator::default().new_span_id();
        Self {
            span: SpanContext::new(trace_id, span_id, flags, false, TraceState::default()),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.span.trace_id()
    }

    /// Continues the remote trace found in `cx`, or starts a new one when
    /// the carrier had none or it was malformed.
    fn continue_from(cx: Context) -> Self {
        let span = cx.span();
        let parent = span.span_context();
        if parent.is_valid() {
            Self::with_parent(parent.trace_id(), parent.trace_flags())
        } else {
            Self::new_root()
        }
    }

    fn context(&self) -> Context {
        Context::new().with_remote_span_context(self.span.clone())
    }

    pub fn inject(&self, headers: &mut Headers) {
        TraceContextPropagator::new().inject_context(&self.context(), headers);
    }

    pub fn extract(headers: &Headers) -> Self {
        Self::continue_from(TraceContextPropagator::new().extract(headers))
    }

    pub fn from_http(headers: &HeaderMap) -> Self {
        Self::continue_from(TraceContextPropagator::new().extract(&HeaderExtractor(headers)))
    }

    /// Headers to attach to an outgoing HTTP request.
    pub fn to_http_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        TraceContextPropagator::new().inject_context(&self.context(), &mut HeaderInjector(&mut headers));
        headers
    }
}

impl Injector for Headers {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key, value);
    }
}

impl Extractor for Headers {
    fn get(&self, key: &str) -> Option<&str> {
        Headers::get(self, key)
    }

    fn keys(&self) -> Vec<&str> {
        self.iter().map(|(k, _)| k.as_str()).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
            self.0.insert(name, value);
        }
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACEPARENT: &str = "traceparent";

    #[test]
    fn inject_then_extract_keeps_trace_id() {
        let root = TraceContext::new_root();
        let mut headers = Headers::new();
        root.inject(&mut headers);

        let traceparent = headers.get(TRACEPARENT).unwrap();
        assert!(traceparent.starts_with(&format!("00-{}-", root.trace_id())));

        let extracted = TraceContext::extract(&headers);
        assert_eq!(extracted.trace_id(), root.trace_id());
        assert_ne!(extracted, root);
    }

    #[test]
    fn malformed_traceparent_starts_new_trace() {
        for value in [
            "nonsense".to_string(),
            format!("00-{}-{}-01", "0".repeat(32), "a".repeat(16)),
        ] {
            let mut headers = Headers::new();
            headers.insert(TRACEPARENT, value);

            let ctx = TraceContext::extract(&headers);
            assert_ne!(ctx.trace_id(), TraceId::INVALID);
        }
    }

    #[test]
    fn http_header_continues_trace() {
        let root = TraceContext::new_root();
        let headers = root.to_http_headers();
        assert!(headers.contains_key(TRACEPARENT));

        assert_eq!(TraceContext::from_http(&headers).trace_id(), root.trace_id());
        assert_ne!(TraceContext::from_http(&HeaderMap::new()).trace_id(), root.trace_id());
    }
}
