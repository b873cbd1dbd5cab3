use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::{Key, KeyValue, Value};

/// A live span handed out by a [`SpanTracer`].
///
/// Mirrors the subset of the OpenTelemetry span API the interceptor needs.
/// Implementations must tolerate `set_attribute` after `end` (ignore it).
pub trait TraceSpan: Send {
    fn set_attribute(&mut self, attribute: KeyValue);
    fn is_recording(&self) -> bool;
    fn set_status(&mut self, status: Status);
    fn end(&mut self);
}

/// Injected span factory. One tracer is shared by every wrapped method.
pub trait SpanTracer: Send + Sync {
    fn start_span(
        &self,
        name: &'static str,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn TraceSpan>;
}

/// Write `value` under `key` unless it is absent or an empty string.
pub fn set_span_attribute(span: &mut dyn TraceSpan, key: impl Into<Key>, value: Option<Value>) {
    match value {
        None => {}
        Some(Value::String(s)) if s.as_str().is_empty() => {}
        Some(v) => span.set_attribute(KeyValue::new(key, v)),
    }
}

/// Convert a JSON field into an attribute value.
///
/// `null` and `""` map to `None`; arrays and objects are rendered as JSON text.
pub fn json_attribute(value: Option<&serde_json::Value>) -> Option<Value> {
    use serde_json::Value as J;
    match value? {
        J::Null => None,
        J::String(s) if s.is_empty() => None,
        J::String(s) => Some(Value::from(s.clone())),
        J::Bool(b) => Some(Value::Bool(*b)),
        J::Number(n) => match n.as_i64() {
            Some(i) => Some(Value::I64(i)),
            None => n.as_f64().map(Value::F64),
        },
        other => Some(Value::from(other.to_string())),
    }
}
