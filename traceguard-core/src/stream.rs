//! Streaming response reassembly: chunks pass through, deltas fold into one response.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;
use opentelemetry::trace::Status;
use serde_json::{Value, json};

use crate::call::ChunkStream;
use crate::classifier::RequestType;
use crate::config::IncompleteSpanPolicy;
use crate::error::CoreResult;
use crate::extract::extract_response_attributes;
use crate::interceptor::record_or_warn;
use crate::payload::{FieldView, Payload};
use crate::telemetry::TraceSpan;

/// Text accumulated for one choice index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChoiceAccumulator {
    pub index: usize,
    pub role: Option<String>,
    pub content: String,
    pub finish_reason: Option<String>,
}

impl ChoiceAccumulator {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

/// One logical response folded from a sequence of chunks.
///
/// Choices are keyed by their reported index; only indices seen in a chunk
/// get an accumulator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteResponse {
    pub model: Option<String>,
    pub choices: BTreeMap<usize, ChoiceAccumulator>,
    pub usage: Option<Value>,
}

impl CompleteResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choice(&self, index: usize) -> Option<&ChoiceAccumulator> {
        self.choices.get(&index)
    }

    fn choice_mut(&mut self, index: usize) -> &mut ChoiceAccumulator {
        self.choices
            .entry(index)
            .or_insert_with(|| ChoiceAccumulator::new(index))
    }

    /// Fold one chunk in. Buffers only grow.
    pub fn absorb(&mut self, chunk: &Payload, request_type: RequestType) -> CoreResult<()> {
        let fields = chunk.fields()?;
        let chunk = fields.view();

        if self.model.is_none()
            && let Some(model) = chunk.str("model").filter(|m| !m.is_empty())
        {
            self.model = Some(model.to_string());
        }
        if let Some(usage) = chunk.get("usage") {
            self.usage = Some(usage.clone());
        }

        let Some(choices) = chunk.list("choices")? else {
            return Ok(());
        };
        for choice in choices {
            let choice = FieldView::of(choice, "choice")?;
            let acc = self.choice_mut(choice.index()?);
            if let Some(reason) = choice.str("finish_reason").filter(|r| !r.is_empty()) {
                acc.finish_reason = Some(reason.to_string());
            }
            match request_type {
                RequestType::Chat => {
                    if let Some(delta) = choice.nested("delta")? {
                        if let Some(content) = delta.str("content") {
                            acc.content.push_str(content);
                        }
                        if let Some(role) = delta.str("role").filter(|r| !r.is_empty()) {
                            acc.role = Some(role.to_string());
                        }
                    }
                }
                RequestType::Completion => {
                    if let Some(text) = choice.str("text") {
                        acc.content.push_str(text);
                    }
                }
                RequestType::Rerank | RequestType::Unknown => {}
            }
        }
        Ok(())
    }

    /// Render as a non-streaming response of the same request type.
    pub fn to_payload(&self, request_type: RequestType) -> Payload {
        let choices: Vec<Value> = self
            .choices
            .values()
            .map(|c| match request_type {
                RequestType::Chat => json!({
                    "index": c.index,
                    "finish_reason": c.finish_reason,
                    "message": {"role": c.role, "content": c.content},
                }),
                _ => json!({
                    "index": c.index,
                    "finish_reason": c.finish_reason,
                    "text": c.content,
                }),
            })
            .collect();
        Payload::from(json!({
            "model": self.model,
            "choices": choices,
            "usage": self.usage,
        }))
    }
}

/// Pass-through chunk stream that owns the call's span until it finishes.
pub struct ReassemblingStream {
    inner: ChunkStream,
    span: Option<Box<dyn TraceSpan>>,
    request_type: RequestType,
    send_prompts: bool,
    incomplete: IncompleteSpanPolicy,
    response: CompleteResponse,
    finished: bool,
}

impl ReassemblingStream {
    pub fn new(
        inner: ChunkStream,
        span: Box<dyn TraceSpan>,
        request_type: RequestType,
        send_prompts: bool,
        incomplete: IncompleteSpanPolicy,
    ) -> Self {
        Self {
            inner,
            span: Some(span),
            request_type,
            send_prompts,
            incomplete,
            response: CompleteResponse::new(),
            finished: false,
        }
    }

    /// Accumulated state so far.
    pub fn response(&self) -> &CompleteResponse {
        &self.response
    }

    fn write_response(&mut self, span: &mut dyn TraceSpan) {
        if !span.is_recording() {
            return;
        }
        let payload = self.response.to_payload(self.request_type);
        record_or_warn(
            "stream response",
            extract_response_attributes(span, self.request_type, &payload, self.send_prompts),
        );
    }

    fn complete(&mut self) {
        if let Some(mut span) = self.span.take() {
            tracing::debug!(choices = self.response.choices.len(), "stream exhausted, ending span");
            if span.is_recording() {
                self.write_response(span.as_mut());
                span.set_status(Status::Ok);
            }
            span.end();
        }
    }

    fn fail(&mut self, message: String) {
        if self.incomplete == IncompleteSpanPolicy::LeaveOpen {
            return;
        }
        if let Some(mut span) = self.span.take() {
            tracing::debug!(error = %message, "stream failed, ending span");
            span.set_status(Status::error(message));
            span.end();
        }
    }
}

impl Stream for ReassemblingStream {
    type Item = CoreResult<Payload>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if self.span.is_some() {
                    let request_type = self.request_type;
                    record_or_warn("stream chunk", self.response.absorb(&chunk, request_type));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                self.fail(err.to_string());
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                self.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ReassemblingStream {
    fn drop(&mut self) {
        if self.incomplete == IncompleteSpanPolicy::LeaveOpen {
            return;
        }
        if let Some(mut span) = self.span.take() {
            tracing::debug!("stream dropped before exhaustion, ending span");
            self.write_response(span.as_mut());
            span.end();
        }
    }
}
