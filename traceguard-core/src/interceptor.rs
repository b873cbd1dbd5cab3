use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use opentelemetry::trace::{SpanKind, Status};

use crate::call::{CallArgs, CallOutput};
use crate::classifier::classify;
use crate::config::{ApiCfg, IncompleteSpanPolicy};
use crate::context::is_instrumentation_suppressed;
use crate::error::CoreResult;
use crate::extract::{extract_request_attributes, extract_response_attributes, set_api_attributes};
use crate::method::{LlmMethod, WrappedMethod};
use crate::policy::ContentPolicy;
use crate::stream::ReassemblingStream;
use crate::telemetry::keys::{LLM_REQUEST_TYPE, LLM_VENDOR, VENDOR_OPENAI};
use crate::telemetry::SpanTracer;
use crate::version::LibraryVersion;

/// Log and swallow an attribute-recording failure.
pub fn record_or_warn(stage: &str, result: CoreResult<()>) {
    if let Err(err) = result {
        tracing::warn!(stage, error = %err, "failed to set {stage} attributes for openai span");
    }
}

/// Shared by every wrapped method of one instrumentor.
#[derive(Clone)]
pub struct InterceptContext {
    pub tracer: Arc<dyn SpanTracer>,
    pub version: Arc<LibraryVersion>,
    pub content: ContentPolicy,
    pub api: ApiCfg,
    pub incomplete: IncompleteSpanPolicy,
}

pub struct InstrumentedMethod {
    descriptor: WrappedMethod,
    inner: Arc<dyn LlmMethod>,
    ctx: Arc<InterceptContext>,
}

impl InstrumentedMethod {
    pub fn new(descriptor: WrappedMethod, inner: Arc<dyn LlmMethod>, ctx: Arc<InterceptContext>) -> Self {
        Self { descriptor, inner, ctx }
    }

    /// The method calls are forwarded to.
    pub fn inner(&self) -> &Arc<dyn LlmMethod> {
        &self.inner
    }
}

#[async_trait]
impl LlmMethod for InstrumentedMethod {
    async fn call(&self, args: CallArgs) -> CoreResult<CallOutput> {
        if is_instrumentation_suppressed() {
            tracing::debug!(span = self.descriptor.span_name, "instrumentation suppressed");
            return self.inner.call(args).await;
        }

        let request_type = classify(self.descriptor.module, self.descriptor.object, &self.ctx.version)?;
        let send_prompts = self.ctx.content.should_send_prompts();
        tracing::debug!(
            module = self.descriptor.module,
            object = self.descriptor.object,
            request_type = request_type.as_str(),
            "intercepted call"
        );

        let mut span = self.ctx.tracer.start_span(
            self.descriptor.span_name,
            SpanKind::Client,
            vec![
                KeyValue::new(LLM_VENDOR, VENDOR_OPENAI),
                KeyValue::new(LLM_REQUEST_TYPE, request_type.as_str()),
            ],
        );

        if span.is_recording() {
            set_api_attributes(span.as_mut(), &self.ctx.api);
            record_or_warn(
                "input",
                extract_request_attributes(span.as_mut(), request_type, &args, send_prompts),
            );
        }

        let output = match self.inner.call(args).await {
            Ok(output) => output,
            Err(err) => {
                if self.ctx.incomplete == IncompleteSpanPolicy::Close {
                    span.set_status(Status::error(err.to_string()));
                    span.end();
                }
                return Err(err);
            }
        };

        match output {
            CallOutput::Stream(chunks) => Ok(CallOutput::Stream(Box::pin(ReassemblingStream::new(
                chunks,
                span,
                request_type,
                send_prompts,
                self.ctx.incomplete,
            )))),
            CallOutput::Value(response) => {
                if !response.is_empty() && span.is_recording() {
                    record_or_warn(
                        "response",
                        extract_response_attributes(span.as_mut(), request_type, &response, send_prompts),
                    );
                    span.set_status(Status::Ok);
                }
                span.end();
                Ok(CallOutput::Value(response))
            }
        }
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{override_content_tracing, suppress_instrumentation};
    use crate::error::TraceguardError;
    use crate::method::{EchoMethod, WRAPPED_METHODS_V0, WRAPPED_METHODS_V1, method_fn};
    use crate::payload::Payload;
    use crate::telemetry::test_log::capture_logs;
    use crate::telemetry::{RecordingTracer, keys::*};
    use crate::version::PackageVersions;
    use futures::StreamExt;
    use serde_json::{Value, json};

    fn ctx(tracer: &RecordingTracer, version: &str, content: bool) -> Arc<InterceptContext> {
        Arc::new(InterceptContext {
            tracer: Arc::new(tracer.clone()),
            version: Arc::new(LibraryVersion::new(
                "openai",
                Arc::new(PackageVersions::new().with("openai", version)),
            )),
            content: ContentPolicy::fixed(content),
            api: ApiCfg::default(),
            incomplete: IncompleteSpanPolicy::Close,
        })
    }

    fn returning(value: Value) -> Arc<dyn LlmMethod> {
        method_fn(move |_| {
            let value = value.clone();
            async move { Ok(CallOutput::Value(Payload::from(value))) }
        })
    }

    fn chat_args() -> CallArgs {
        CallArgs::new()
            .kwarg("model", "gpt-4")
            .kwarg("messages", json!([{"role": "user", "content": "hello"}]))
    }

    #[tokio::test]
    async fn v0_chat_call_is_traced_and_returned_unchanged() {
        let tracer = RecordingTracer::new();
        let response = json!({
            "model": "gpt-4-0613",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        });
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], returning(response.clone()), ctx(&tracer, "0.28.1", true));

        let out = wrapped.call(chat_args()).await.unwrap();
        assert_eq!(out.into_value(), Some(Payload::from(response)));

        assert_eq!(tracer.started(), 1);
        assert_eq!(tracer.ended(), 1);
        let span = &tracer.spans()[0];
        assert_eq!(span.name, "openai.chat");
        assert_eq!(span.kind, SpanKind::Client);
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.str_attr(LLM_VENDOR).as_deref(), Some("OpenAI"));
        assert_eq!(span.str_attr(LLM_REQUEST_TYPE).as_deref(), Some("chat"));
        assert_eq!(span.str_attr(LLM_REQUEST_MODEL).as_deref(), Some("gpt-4"));
        assert_eq!(span.str_attr("llm.prompts.0.content").as_deref(), Some("hello"));
        assert_eq!(span.str_attr(LLM_RESPONSE_MODEL).as_deref(), Some("gpt-4-0613"));
        assert_eq!(span.str_attr("llm.completions.0.content").as_deref(), Some("hi"));
        assert_eq!(span.attr(LLM_USAGE_TOTAL_TOKENS), Some(&opentelemetry::Value::I64(6)));
    }

    #[tokio::test]
    async fn v1_completion_is_classified_by_module_suffix() {
        let tracer = RecordingTracer::new();
        let wrapped = InstrumentedMethod::new(
            WRAPPED_METHODS_V1[1],
            returning(json!({"choices": [{"index": 0, "text": "t"}]})),
            ctx(&tracer, "1.3.0", true),
        );
        wrapped.call(CallArgs::new().kwarg("prompt", "p")).await.unwrap();
        let span = &tracer.spans()[0];
        assert_eq!(span.name, "openai.completion");
        assert_eq!(span.str_attr(LLM_REQUEST_TYPE).as_deref(), Some("completion"));
        assert_eq!(span.str_attr("llm.prompts.0.user").as_deref(), Some("p"));
    }

    #[tokio::test]
    async fn content_off_keeps_prompts_out_unless_overridden() {
        let tracer = RecordingTracer::new();
        let wrapped = InstrumentedMethod::new(
            WRAPPED_METHODS_V0[0],
            returning(json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]})),
            ctx(&tracer, "0.28.1", false),
        );
        wrapped.call(chat_args()).await.unwrap();
        let span = &tracer.spans()[0];
        assert_eq!(span.str_attr(LLM_REQUEST_MODEL).as_deref(), Some("gpt-4"));
        assert!(span.keys_with_prefix(LLM_PROMPTS).is_empty());
        assert!(span.keys_with_prefix(LLM_COMPLETIONS).is_empty());

        tracer.clear();
        let _g = override_content_tracing(true);
        wrapped.call(chat_args()).await.unwrap();
        assert_eq!(tracer.spans()[0].str_attr("llm.prompts.0.role").as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn suppression_skips_the_span() {
        let tracer = RecordingTracer::new();
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], Arc::new(EchoMethod::chat()), ctx(&tracer, "0.28.1", true));
        let _g = suppress_instrumentation();
        let out = wrapped.call(chat_args()).await.unwrap();
        assert!(out.into_value().is_some());
        assert_eq!(tracer.started(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_warns_and_call_proceeds() {
        let (logs, _guard) = capture_logs();
        let tracer = RecordingTracer::new();
        let response = json!({"choices": [{"text": "missing index"}]});
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[1], returning(response.clone()), ctx(&tracer, "0.28.1", true));

        let args = CallArgs::new().kwarg("model", "davinci").kwarg("prompt", json!([]));
        let out = wrapped.call(args).await.unwrap();
        assert_eq!(out.into_value(), Some(Payload::from(response)));

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 2, "{warnings:?}");
        let span = &tracer.spans()[0];
        assert!(span.ended);
        assert_eq!(span.str_attr(LLM_REQUEST_MODEL).as_deref(), Some("davinci"));
    }

    #[tokio::test]
    async fn underlying_error_is_returned_unchanged_and_span_closed() {
        let tracer = RecordingTracer::new();
        let failing = method_fn(|_| async {
            Err(TraceguardError::RateLimited { provider: "openai".into(), retry_after: Some(2) })
        });
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], failing, ctx(&tracer, "0.28.1", true));
        let err = wrapped.call(chat_args()).await.unwrap_err();
        assert!(matches!(err, TraceguardError::RateLimited { retry_after: Some(2), .. }));

        let span = &tracer.spans()[0];
        assert!(span.ended);
        assert!(matches!(span.status, Status::Error { .. }));
        assert!(span.keys_with_prefix(LLM_COMPLETIONS).is_empty());
    }

    #[tokio::test]
    async fn leave_open_policy_keeps_failed_span_open() {
        let tracer = RecordingTracer::new();
        let mut c = (*ctx(&tracer, "0.28.1", true)).clone();
        c.incomplete = IncompleteSpanPolicy::LeaveOpen;
        let failing = method_fn(|_| async { Err(TraceguardError::ProviderUnavailable { provider: "x".into() }) });
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], failing, Arc::new(c));
        assert!(wrapped.call(chat_args()).await.is_err());
        let span = &tracer.spans()[0];
        assert!(!span.ended);
        assert_eq!(span.status, Status::Unset);
    }

    #[tokio::test]
    async fn empty_response_ends_span_without_status() {
        let tracer = RecordingTracer::new();
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], returning(json!({})), ctx(&tracer, "0.28.1", true));
        wrapped.call(chat_args()).await.unwrap();
        let span = &tracer.spans()[0];
        assert!(span.ended);
        assert_eq!(span.status, Status::Unset);
        assert!(span.attr(LLM_RESPONSE_MODEL).is_none());
    }

    #[tokio::test]
    async fn streamed_call_ends_span_after_last_chunk() {
        let tracer = RecordingTracer::new();
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], Arc::new(EchoMethod::chat()), ctx(&tracer, "0.28.1", true));

        let direct: Vec<Payload> = EchoMethod::chat()
            .call(chat_args().kwarg("stream", true))
            .await
            .unwrap()
            .into_stream()
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        let mut stream = wrapped.call(chat_args().kwarg("stream", true)).await.unwrap().into_stream().unwrap();
        assert_eq!(tracer.ended(), 0);
        let mut seen = Vec::new();
        while let Some(chunk) = stream.next().await {
            seen.push(chunk.unwrap());
        }
        assert_eq!(seen, direct);

        let span = &tracer.spans()[0];
        assert!(span.ended);
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.str_attr("llm.completions.0.content").as_deref(), Some("echo: hello"));
        assert_eq!(span.str_attr("llm.completions.0.role").as_deref(), Some("assistant"));
        assert_eq!(span.attr(LLM_USAGE_TOTAL_TOKENS), Some(&opentelemetry::Value::I64(3)));
    }

    #[tokio::test]
    async fn non_recording_span_gets_no_attributes_but_is_ended() {
        let tracer = RecordingTracer::non_recording();
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], Arc::new(EchoMethod::chat()), ctx(&tracer, "0.28.1", true));
        let out = wrapped.call(chat_args()).await.unwrap();
        assert!(out.into_value().is_some());
        let span = &tracer.spans()[0];
        assert!(span.ended);
        assert_eq!(span.status, Status::Unset);
        assert!(span.attr(LLM_REQUEST_MODEL).is_none());
    }

    #[tokio::test]
    async fn version_detection_failure_is_an_error() {
        let tracer = RecordingTracer::new();
        let c = Arc::new(InterceptContext {
            version: Arc::new(LibraryVersion::new("openai", Arc::new(PackageVersions::new()))),
            ..(*ctx(&tracer, "0.28.1", true)).clone()
        });
        let wrapped = InstrumentedMethod::new(WRAPPED_METHODS_V0[0], Arc::new(EchoMethod::chat()), c);
        let err = wrapped.call(chat_args()).await.unwrap_err();
        assert!(matches!(err, TraceguardError::VersionDetection { .. }));
        assert_eq!(tracer.started(), 0);
    }
}
