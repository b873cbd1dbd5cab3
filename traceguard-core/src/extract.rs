use opentelemetry::Value as AttrValue;
use serde_json::Value;

use crate::call::CallArgs;
use crate::classifier::RequestType;
use crate::config::ApiCfg;
use crate::error::{CoreResult, TraceguardError};
use crate::payload::{FieldView, Payload};
use crate::telemetry::keys::*;
use crate::telemetry::{TraceSpan, json_attribute, set_span_attribute};

fn owned(value: &Option<String>) -> Option<AttrValue> {
    value.clone().map(AttrValue::from)
}

/// Endpoint metadata of the configured client.
pub fn set_api_attributes(span: &mut dyn TraceSpan, api: &ApiCfg) {
    set_span_attribute(span, OPENAI_API_BASE, owned(&api.base_url));
    set_span_attribute(span, OPENAI_API_TYPE, owned(&api.api_type));
    set_span_attribute(span, OPENAI_API_VERSION, owned(&api.api_version));
}

/// `headers` rendered as text; a missing value renders as `None`.
pub fn render_headers(headers: Option<&Value>) -> String {
    match headers {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn extract_request_attributes(
    span: &mut dyn TraceSpan,
    request_type: RequestType,
    args: &CallArgs,
    send_prompts: bool,
) -> CoreResult<()> {
    let kwargs = FieldView::from_map(&args.kwargs);

    set_span_attribute(span, LLM_REQUEST_MODEL, json_attribute(kwargs.get("model")));
    set_span_attribute(span, LLM_REQUEST_MAX_TOKENS, json_attribute(kwargs.get("max_tokens")));
    set_span_attribute(span, LLM_TEMPERATURE, json_attribute(kwargs.get("temperature")));
    set_span_attribute(span, LLM_TOP_P, json_attribute(kwargs.get("top_p")));
    set_span_attribute(
        span,
        LLM_FREQUENCY_PENALTY,
        json_attribute(kwargs.get("frequency_penalty")),
    );
    set_span_attribute(
        span,
        LLM_PRESENCE_PENALTY,
        json_attribute(kwargs.get("presence_penalty")),
    );
    set_span_attribute(span, LLM_USER, json_attribute(kwargs.get("user")));
    set_span_attribute(
        span,
        LLM_HEADERS,
        Some(AttrValue::from(render_headers(kwargs.get("headers")))),
    );

    if !send_prompts {
        return Ok(());
    }

    match request_type {
        RequestType::Chat => {
            if let Some(messages) = kwargs.list("messages")? {
                set_span_prompts(span, messages)?;
            }
        }
        RequestType::Completion => {
            let prompt = match kwargs.get("prompt") {
                Some(Value::Array(items)) => Some(
                    items
                        .first()
                        .ok_or_else(|| TraceguardError::extraction("prompt list is empty"))?,
                ),
                other => other,
            };
            set_span_attribute(span, format!("{LLM_PROMPTS}.0.user"), json_attribute(prompt));
        }
        RequestType::Rerank | RequestType::Unknown => {}
    }

    if let Some(functions) = kwargs.list("functions")? {
        for (i, function) in functions.iter().enumerate() {
            let function = FieldView::of(function, "function")?;
            let prefix = format!("{LLM_REQUEST_FUNCTIONS}.{i}");
            set_span_attribute(span, format!("{prefix}.name"), json_attribute(function.get("name")));
            set_span_attribute(
                span,
                format!("{prefix}.description"),
                json_attribute(function.get("description")),
            );
            let parameters = function.get("parameters").unwrap_or(&Value::Null);
            set_span_attribute(
                span,
                format!("{prefix}.parameters"),
                Some(AttrValue::from(parameters.to_string())),
            );
        }
    }

    Ok(())
}

fn set_span_prompts(span: &mut dyn TraceSpan, messages: &[Value]) -> CoreResult<()> {
    for (i, message) in messages.iter().enumerate() {
        let message = FieldView::of(message, "message")?;
        let prefix = format!("{LLM_PROMPTS}.{i}");
        set_span_attribute(span, format!("{prefix}.role"), json_attribute(message.get("role")));
        set_span_attribute(
            span,
            format!("{prefix}.content"),
            json_attribute(message.get("content")),
        );
    }
    Ok(())
}

pub fn extract_response_attributes(
    span: &mut dyn TraceSpan,
    request_type: RequestType,
    response: &Payload,
    send_prompts: bool,
) -> CoreResult<()> {
    tracing::debug!(request_type = request_type.as_str(), ?response, "recording response attributes");
    let fields = response.fields()?;
    let response = fields.view();

    set_span_attribute(span, LLM_RESPONSE_MODEL, json_attribute(response.get("model")));

    if send_prompts && let Some(choices) = response.list("choices")? {
        set_span_completions(span, request_type, choices)?;
    }

    if let Some(usage) = response.nested("usage")? {
        set_span_attribute(span, LLM_USAGE_TOTAL_TOKENS, json_attribute(usage.get("total_tokens")));
        set_span_attribute(
            span,
            LLM_USAGE_COMPLETION_TOKENS,
            json_attribute(usage.get("completion_tokens")),
        );
        set_span_attribute(span, LLM_USAGE_PROMPT_TOKENS, json_attribute(usage.get("prompt_tokens")));
    }

    Ok(())
}

/// One group of `llm.completions.<index>.*` keys per choice, keyed by the
/// choice's own `index` field rather than its position.
pub fn set_span_completions(
    span: &mut dyn TraceSpan,
    request_type: RequestType,
    choices: &[Value],
) -> CoreResult<()> {
    for choice in choices {
        let choice = FieldView::of(choice, "choice")?;
        let prefix = format!("{LLM_COMPLETIONS}.{}", choice.index()?);
        set_span_attribute(
            span,
            format!("{prefix}.finish_reason"),
            json_attribute(choice.get("finish_reason")),
        );

        match request_type {
            RequestType::Chat => {
                let Some(message) = choice.nested("message")? else {
                    continue;
                };
                set_span_attribute(span, format!("{prefix}.role"), json_attribute(message.get("role")));
                set_span_attribute(
                    span,
                    format!("{prefix}.content"),
                    json_attribute(message.get("content")),
                );
                if let Some(call) = message.nested("function_call")? {
                    set_span_attribute(
                        span,
                        format!("{prefix}.function_call.name"),
                        json_attribute(call.get("name")),
                    );
                    set_span_attribute(
                        span,
                        format!("{prefix}.function_call.arguments"),
                        json_attribute(call.get("arguments")),
                    );
                }
            }
            RequestType::Completion => {
                set_span_attribute(span, format!("{prefix}.content"), json_attribute(choice.get("text")));
            }
            RequestType::Rerank | RequestType::Unknown => {}
        }
    }
    Ok(())
}
