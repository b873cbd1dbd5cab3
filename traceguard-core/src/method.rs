use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::call::{CallArgs, CallOutput};
use crate::classifier::RequestType;
use crate::error::CoreResult;
use crate::payload::{FieldView, Payload};

/// Static description of one target method to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrappedMethod {
    pub module: &'static str,
    pub object: &'static str,
    pub method: &'static str,
    pub span_name: &'static str,
}

impl WrappedMethod {
    pub fn key(&self) -> MethodKey {
        MethodKey::new(self.module, self.object, self.method)
    }
}

pub const WRAPPED_METHODS_V0: &[WrappedMethod] = &[
    WrappedMethod {
        module: "openai",
        object: "ChatCompletion",
        method: "create",
        span_name: "openai.chat",
    },
    WrappedMethod {
        module: "openai",
        object: "Completion",
        method: "create",
        span_name: "openai.completion",
    },
];

pub const WRAPPED_METHODS_V1: &[WrappedMethod] = &[
    WrappedMethod {
        module: "openai.resources.chat.completions",
        object: "Completions",
        method: "create",
        span_name: "openai.chat",
    },
    WrappedMethod {
        module: "openai.resources.completions",
        object: "Completions",
        method: "create",
        span_name: "openai.completion",
    },
];

pub fn wrapped_methods(is_v1: bool) -> &'static [WrappedMethod] {
    if is_v1 { WRAPPED_METHODS_V1 } else { WRAPPED_METHODS_V0 }
}

/// Address of a callable in the [`crate::registry::MethodRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub module: String,
    pub object: String,
    pub method: String,
}

impl MethodKey {
    pub fn new(module: impl Into<String>, object: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            object: object.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.module, self.object, self.method)
    }
}

/// A target library method: takes call arguments, returns a value or a stream.
#[async_trait]
pub trait LlmMethod: Send + Sync {
    async fn call(&self, args: CallArgs) -> CoreResult<CallOutput>;

    /// True for a method that already records spans around another one.
    fn is_instrumented(&self) -> bool {
        false
    }
}

struct FnMethod<F>(F);

#[async_trait]
impl<F, Fut> LlmMethod for FnMethod<F>
where
    F: Fn(CallArgs) -> Fut + Send + Sync,
    Fut: Future<Output = CoreResult<CallOutput>> + Send,
{
    async fn call(&self, args: CallArgs) -> CoreResult<CallOutput> {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a method.
pub fn method_fn<F, Fut>(f: F) -> Arc<dyn LlmMethod>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<CallOutput>> + Send + 'static,
{
    Arc::new(FnMethod(f))
}

/// Offline target that answers with the caller's own words.
///
/// Returns mapping-backed responses shaped like the version-0 client's, and
/// streams one chunk per word when `stream` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoMethod {
    kind: RequestType,
}

impl EchoMethod {
    pub fn chat() -> Self {
        Self { kind: RequestType::Chat }
    }

    pub fn completion() -> Self {
        Self {
            kind: RequestType::Completion,
        }
    }

    fn prompt(&self, kwargs: FieldView<'_>) -> CoreResult<String> {
        match self.kind {
            RequestType::Chat => Ok(kwargs
                .list("messages")?
                .and_then(|m| m.last())
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            _ => Ok(match kwargs.get("prompt") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(items)) => items
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            }),
        }
    }

    fn choice(&self, text: &str, finish_reason: Option<&str>, streaming: bool) -> Value {
        match (self.kind, streaming) {
            (RequestType::Chat, false) => json!({
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": finish_reason,
            }),
            (RequestType::Chat, true) => json!({
                "index": 0,
                "delta": {"content": text},
                "finish_reason": finish_reason,
            }),
            _ => json!({"index": 0, "text": text, "finish_reason": finish_reason}),
        }
    }
}

#[async_trait]
impl LlmMethod for EchoMethod {
    async fn call(&self, args: CallArgs) -> CoreResult<CallOutput> {
        let kwargs = FieldView::from_map(&args.kwargs);
        let model = kwargs.str("model").unwrap_or("echo").to_string();
        let prompt = self.prompt(kwargs)?;
        let reply = format!("echo: {prompt}");
        let usage = json!({
            "prompt_tokens": prompt.split_whitespace().count(),
            "completion_tokens": reply.split_whitespace().count(),
            "total_tokens": prompt.split_whitespace().count() + reply.split_whitespace().count(),
        });

        if !args.wants_stream() {
            return Ok(CallOutput::Value(Payload::from(json!({
                "id": "echo-0",
                "model": model,
                "choices": [self.choice(&reply, Some("stop"), false)],
                "usage": usage,
            }))));
        }

        let mut chunks = Vec::new();
        if self.kind == RequestType::Chat {
            chunks.push(json!({
                "model": model,
                "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}],
            }));
        }
        let words: Vec<&str> = reply.split_inclusive(' ').collect();
        for (i, word) in words.iter().enumerate() {
            let last = i + 1 == words.len();
            let mut chunk = json!({
                "model": model,
                "choices": [self.choice(word, last.then_some("stop"), true)],
            });
            if last {
                chunk["usage"] = usage.clone();
            }
            chunks.push(chunk);
        }
        let stream = futures::stream::iter(chunks.into_iter().map(|c| Ok(Payload::from(c))));
        Ok(CallOutput::Stream(stream.boxed()))
    }
}
