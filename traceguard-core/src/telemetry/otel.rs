//! Bridge from the crate's span seam to a real OpenTelemetry tracer.

use opentelemetry::InstrumentationScope;
use opentelemetry::trace::{Span, SpanKind, Status, Tracer, TracerProvider};
use opentelemetry::KeyValue;

use super::span::{SpanTracer, TraceSpan};

/// Adapts any OpenTelemetry [`Tracer`] to [`SpanTracer`].
#[derive(Debug, Clone)]
pub struct OtelTracer<T> {
    tracer: T,
}

impl<T> OtelTracer<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }
}

/// Obtain a tracer from an injected provider, scoped to this crate and version.
pub fn tracer_from_provider<P>(provider: &P, tracer_name: &str) -> OtelTracer<P::Tracer>
where
    P: TracerProvider,
    P::Tracer: Send + Sync,
    <P::Tracer as Tracer>::Span: Send + 'static,
{
    let scope = InstrumentationScope::builder(tracer_name.to_string())
        .with_version(env!("CARGO_PKG_VERSION"))
        .build();
    OtelTracer::new(provider.tracer_with_scope(scope))
}

impl<T> SpanTracer for OtelTracer<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + 'static,
{
    fn start_span(
        &self,
        name: &'static str,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Box<dyn TraceSpan> {
        let builder = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes);
        Box::new(OtelSpan(self.tracer.build(builder)))
    }
}

struct OtelSpan<S>(S);

impl<S: Span + Send> TraceSpan for OtelSpan<S> {
    fn set_attribute(&mut self, attribute: KeyValue) {
        self.0.set_attribute(attribute);
    }

    fn is_recording(&self) -> bool {
        self.0.is_recording()
    }

    fn set_status(&mut self, status: Status) {
        self.0.set_status(status);
    }

    fn end(&mut self) {
        self.0.end();
    }
}
