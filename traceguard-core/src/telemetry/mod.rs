//! Span primitives used by the interceptor.
//!
//! The interceptor only ever talks to [`SpanTracer`] / [`TraceSpan`]. Wire a
//! real OpenTelemetry pipeline in with [`tracer_from_provider`], or use
//! [`RecordingTracer`] to keep spans in memory.

pub mod keys;
pub mod otel;
pub mod recording;
pub mod span;
#[cfg(test)]
pub mod test_log;

pub use keys::*;
pub use otel::{OtelTracer, tracer_from_provider};
pub use recording::{RecordedSpan, RecordingTracer};
pub use span::{SpanTracer, TraceSpan, json_attribute, set_span_attribute};
