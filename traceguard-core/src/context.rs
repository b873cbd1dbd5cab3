use opentelemetry::{Context, ContextGuard};

/// While attached, wrapped methods call straight through without a span.
#[derive(Debug, Clone, Copy)]
pub struct SuppressInstrumentation;

/// Forces content tracing on (when `true`) regardless of configuration.
#[derive(Debug, Clone, Copy)]
pub struct OverrideContentTracing(pub bool);

pub fn suppress_instrumentation() -> ContextGuard {
    Context::current_with_value(SuppressInstrumentation).attach()
}

pub fn override_content_tracing(enabled: bool) -> ContextGuard {
    Context::current_with_value(OverrideContentTracing(enabled)).attach()
}

pub fn is_instrumentation_suppressed() -> bool {
    Context::current().get::<SuppressInstrumentation>().is_some()
}

pub fn content_tracing_overridden() -> bool {
    Context::current()
        .get::<OverrideContentTracing>()
        .is_some_and(|o| o.0)
}
