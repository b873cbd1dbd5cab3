//! HTTP-backed version-1 OpenAI client exposed as target methods.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::ready;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::call::{CallArgs, CallOutput};
use crate::config::Config;
use crate::error::{CoreResult, TraceguardError};
use crate::http_client::HttpClient;
use crate::method::{LlmMethod, WRAPPED_METHODS_V1};
use crate::model::{ChatCompletion, ChatCompletionChunk, Completion};
use crate::payload::{AttributeObject, Payload};
use crate::registry::MethodRegistry;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAI {
    http: HttpClient,
    base: String,
    org: Option<String>,
    api_key: SecretString,
}

impl fmt::Debug for OpenAI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAI")
            .field("base", &self.base)
            .field("org", &self.org)
            .finish_non_exhaustive()
    }
}

impl OpenAI {
    pub fn new(http: HttpClient, api_key: SecretString, base: String, org: Option<String>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            org,
            api_key,
        }
    }

    /// Build from config; `None` when the API key variable is unset.
    pub fn from_config(cfg: &Config) -> CoreResult<Option<Self>> {
        let Ok(key) = std::env::var(&cfg.api.api_key_env) else {
            return Ok(None);
        };
        let base = cfg
            .api
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let http = HttpClient::from_cfg(&cfg.http)?;
        Ok(Some(Self::new(
            http,
            SecretString::from(key),
            base,
            cfg.api.organization.clone(),
        )))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAI::new(
            HttpClient::new_default().unwrap(),
            SecretString::from("test-key".to_string()),
            format!("{server_base}/v1"),
            None,
        )
    }

    /// Register chat and text completions under the version-1 method keys.
    pub fn register(self: &Arc<Self>, registry: &MethodRegistry) {
        for descriptor in WRAPPED_METHODS_V1 {
            let method: Arc<dyn LlmMethod> = match descriptor.span_name {
                "openai.chat" => Arc::new(ChatCompletions(self.clone())),
                _ => Arc::new(Completions(self.clone())),
            };
            registry.register(descriptor.key(), method);
        }
    }

    /// Authorization headers plus any `headers` mapping passed in the call.
    fn headers(&self, extra: Option<&Value>) -> CoreResult<Vec<(String, String)>> {
        let mut h = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        match extra {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (k, v) in map {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    h.push((k.clone(), v));
                }
            }
            Some(_) => {
                return Err(TraceguardError::Validation("headers must be a mapping".into()));
            }
        }
        Ok(h)
    }

    async fn create<R, C>(&self, path: &str, args: CallArgs) -> CoreResult<CallOutput>
    where
        R: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
        C: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
    {
        let stream = args.wants_stream();
        let mut body = args.kwargs;
        let extra = body.remove("headers");
        let owned_headers = self.headers(extra.as_ref())?;
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}{}", self.base, path);

        if !stream {
            let resp: R = self.http.post_json(&url, &body, &hdrs).await?;
            return Ok(CallOutput::Value(Payload::object(resp)));
        }

        let lines = self.http.post_sse_lines(&url, &body, &hdrs).await?;
        let chunks = lines
            .take_while(|line| {
                ready(!matches!(line, Ok(l) if l.data().is_some_and(|d| d.trim() == "[DONE]")))
            })
            .filter_map(|line| {
                ready(match line {
                    Err(e) => Some(Err(e)),
                    Ok(l) => l.data().map(decode_chunk::<C>),
                })
            });
        Ok(CallOutput::Stream(chunks.boxed()))
    }
}

fn decode_chunk<C>(data: &str) -> CoreResult<Payload>
where
    C: DeserializeOwned + AttributeObject + 'static,
{
    serde_json::from_str::<C>(data)
        .map(Payload::object)
        .map_err(|e| TraceguardError::ProviderError {
            provider: "openai".into(),
            code: "stream".into(),
            message: format!("json decode error: {e}"),
        })
}

/// `chat.completions.create`
pub struct ChatCompletions(pub Arc<OpenAI>);

#[async_trait]
impl LlmMethod for ChatCompletions {
    async fn call(&self, args: CallArgs) -> CoreResult<CallOutput> {
        self.0
            .create::<ChatCompletion, ChatCompletionChunk>("/chat/completions", args)
            .await
    }
}

/// `completions.create`
pub struct Completions(pub Arc<OpenAI>);

#[async_trait]
impl LlmMethod for Completions {
    async fn call(&self, args: CallArgs) -> CoreResult<CallOutput> {
        self.0.create::<Completion, Completion>("/completions", args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentor::Instrumentor;
    use crate::model::{ChatCompletionRequest, ChatMessage, Role};
    use crate::telemetry::RecordingTracer;
    use crate::version::PackageVersions;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use opentelemetry::trace::Status;
    use serde_json::json;

    fn chat_args(stream: bool) -> CallArgs {
        CallArgs::from_request(&ChatCompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::new(Role::User, "Hi")],
            stream,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn chat_200_decodes_typed_object() {
        let server = MockServer::start();
        let client = Arc::new(OpenAI::new_for_tests(&server.base_url()));
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200).json_body(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1,
                "model": "gpt-4o-2024-08-06",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }));
        });

        let out = ChatCompletions(client).call(chat_args(false)).await.unwrap();
        let payload = out.into_value().unwrap();
        let completion = payload.downcast_ref::<ChatCompletion>().unwrap();
        assert_eq!(completion.text(), Some("Hello!"));
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
        m.assert();
    }

    #[tokio::test]
    async fn call_headers_are_sent_not_serialized() {
        let server = MockServer::start();
        let client = Arc::new(OpenAI::new_for_tests(&server.base_url()));
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/completions")
                .header("x-tenant", "acme")
                .json_body(json!({"model": "davinci", "prompt": "p"}));
            then.status(200).json_body(json!({
                "model": "davinci", "choices": [{"index": 0, "text": "ok"}]
            }));
        });

        let args = CallArgs::new()
            .kwarg("model", "davinci")
            .kwarg("prompt", "p")
            .kwarg("headers", json!({"x-tenant": "acme"}));
        Completions(client).call(args).await.unwrap();
        m.assert();
    }

    #[tokio::test]
    async fn chat_stream_yields_typed_chunks_until_done() {
        let server = MockServer::start();
        let client = Arc::new(OpenAI::new_for_tests(&server.base_url()));
        let sse = [
            r#"data: {"id":"c","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
            "",
            r#"data: {"id":"c","model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#,
            "",
            "data: [DONE]",
            "",
        ]
        .join("\n");
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions").body_contains("\"stream\":true");
            then.status(200).header("content-type", "text/event-stream").body(sse);
        });

        let stream = ChatCompletions(client).call(chat_args(true)).await.unwrap().into_stream().unwrap();
        let chunks: Vec<Payload> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 2);
        let last = chunks[1].downcast_ref::<ChatCompletionChunk>().unwrap();
        assert_eq!(last.choices[0].delta.content.as_deref(), Some("Hi"));
    }

    #[tokio::test]
    async fn chat_429_with_retry_after_maps_to_rate_limited() {
        let server = MockServer::start();
        let client = Arc::new(OpenAI::new_for_tests(&server.base_url()));
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).header("Retry-After", "2").body("limit");
        });
        let err = ChatCompletions(client).call(chat_args(false)).await.unwrap_err();
        match err {
            TraceguardError::RateLimited { retry_after, .. } => assert_eq!(retry_after, Some(2)),
            other => panic!("expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_mapping_headers_are_rejected() {
        let client = Arc::new(OpenAI::new_for_tests("http://127.0.0.1:9"));
        let args = chat_args(false).kwarg("headers", "x-a: b");
        let err = ChatCompletions(client).call(args).await.unwrap_err();
        assert!(matches!(err, TraceguardError::Validation(_)));
    }

    #[tokio::test]
    async fn instrumented_http_calls_produce_spans() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "model": "gpt-4o-2024-08-06",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }));
        });

        let registry = Arc::new(MethodRegistry::new());
        Arc::new(OpenAI::new_for_tests(&server.base_url())).register(&registry);
        let tracer = RecordingTracer::new();
        let mut cfg = Config::default();
        cfg.tracing.trace_content = Some(true);
        let inst = Instrumentor::new(
            registry.clone(),
            Arc::new(tracer.clone()),
            Arc::new(PackageVersions::new().with("openai", "1.3.0")),
            &cfg,
        );
        inst.instrument().unwrap();

        let out = registry.call(&WRAPPED_METHODS_V1[0].key(), chat_args(false)).await.unwrap();
        assert!(out.into_value().unwrap().downcast_ref::<ChatCompletion>().is_some());

        let span = &tracer.spans()[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.str_attr("llm.request.type").as_deref(), Some("chat"));
        assert_eq!(span.str_attr("llm.response.model").as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(span.str_attr("llm.completions.0.content").as_deref(), Some("Hello!"));
        assert_eq!(span.str_attr("llm.prompts.0.content").as_deref(), Some("Hi"));
    }
}
